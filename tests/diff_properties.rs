//! Property tests for the diff engine over an indexed collection.

use indexmap::IndexMap;
use proptest::prelude::*;

use trellis::{
    array_of, diff_full, set, validate_shape, Address, Component, ComponentDef, DiffTag, Model,
    Value,
};

fn cell() -> Component {
    Component::new(ComponentDef {
        name: Some("cell".into()),
        ..Default::default()
    })
    .unwrap()
}

fn grid() -> Model {
    Model::Object(IndexMap::from([("cells".to_string(), array_of(cell()))]))
}

fn state_of(ns: &[i64]) -> Value {
    Value::from_pairs([(
        "cells",
        Value::array(
            ns.iter()
                .map(|n| Value::from_pairs([("n", Value::from(*n))]))
                .collect(),
        ),
    )])
}

fn member(i: usize) -> Address {
    Address::root().field("cells").index(i)
}

proptest! {
    #[test]
    fn generated_states_validate(ns in prop::collection::vec(any::<i64>(), 0..8)) {
        let model = grid();
        validate_shape(&model, &state_of(&ns)).unwrap();
    }

    #[test]
    fn identical_snapshot_is_unchanged(ns in prop::collection::vec(any::<i64>(), 0..8)) {
        let model = grid();
        let state = state_of(&ns);
        // A clone shares every node; classification is by identity.
        let result = diff_full(&model, &state.clone(), Some(&state)).unwrap();
        prop_assert!(result.tree.is_unchanged());
        prop_assert!(result.min_update.is_none());
    }

    #[test]
    fn persistent_write_localizes_to_one_member(
        ns in prop::collection::vec(any::<i64>(), 1..8),
        pick in any::<prop::sample::Index>(),
        replacement in any::<i64>(),
    ) {
        let model = grid();
        let old = state_of(&ns);
        let i = pick.index(ns.len());

        // Even an equal scalar is a fresh node, so the member updates.
        let new = set(&old, &member(i), Value::from_pairs([("n", Value::from(replacement))])).unwrap();
        let result = diff_full(&model, &new, Some(&old)).unwrap();

        for j in 0..ns.len() {
            let tag = result.tree.at(&member(j)).and_then(|d| d.tag());
            let expected = if j == i { DiffTag::Update } else { DiffTag::Unchanged };
            prop_assert_eq!(tag, Some(expected));
        }
        let min = result.min_update.unwrap();
        prop_assert_eq!(min.address.to_string(), member(i).to_string());
    }

    #[test]
    fn append_creates_only_the_new_member(ns in prop::collection::vec(any::<i64>(), 0..8)) {
        let model = grid();
        let old = state_of(&ns);
        let new = set(&old, &member(ns.len()), Value::from_pairs([("n", Value::from(0i64))])).unwrap();

        let result = diff_full(&model, &new, Some(&old)).unwrap();
        prop_assert_eq!(
            result.tree.at(&member(ns.len())).and_then(|d| d.tag()),
            Some(DiffTag::Create)
        );
        for j in 0..ns.len() {
            prop_assert_eq!(
                result.tree.at(&member(j)).and_then(|d| d.tag()),
                Some(DiffTag::Unchanged)
            );
        }
        let min = result.min_update.unwrap();
        prop_assert_eq!(min.address.to_string(), member(ns.len()).to_string());
    }
}
