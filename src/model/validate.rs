//! State shape validation.
//!
//! Runs whenever external code injects a whole state subtree (initial
//! state, hot-loading through `RunHandle::set_state`) - not on every
//! transition, since transitions come out of the component's own reducers.
//!
//! Extra state keys the model does not mention are ignored; null and
//! absent both mean "no instance here" and always validate.

use crate::address::Address;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::value::Value;

/// Check `state` against `model`, reporting the offending address on the
/// first mismatch.
pub fn validate_shape(model: &Model, state: &Value) -> Result<()> {
    validate_at(model, Some(state), Address::root())
}

fn validate_at(model: &Model, state: Option<&Value>, address: Address) -> Result<()> {
    let Some(state) = state.filter(|s| !s.is_null()) else {
        return Ok(());
    };

    match model {
        Model::Component(c) => match c.nested() {
            Some(nested) => validate_at(nested, Some(state), address),
            // Component-local state is opaque to the framework.
            None => Ok(()),
        },
        Model::ObjectOf(c) => {
            let Some(members) = state.as_object() else {
                return Err(Error::shape(address, "object", state.kind_name()));
            };
            for (key, member) in members {
                let member_model = Model::Component(c.clone());
                validate_at(&member_model, Some(member), address.clone().field(key.clone()))?;
            }
            Ok(())
        }
        Model::ArrayOf(c) => {
            let Some(members) = state.as_array() else {
                return Err(Error::shape(address, "array", state.kind_name()));
            };
            for (i, member) in members.iter().enumerate() {
                let member_model = Model::Component(c.clone());
                validate_at(&member_model, Some(member), address.clone().index(i))?;
            }
            Ok(())
        }
        Model::Object(fields) => {
            if !state.is_object() {
                return Err(Error::shape(address, "object", state.kind_name()));
            }
            for (name, nested) in fields {
                validate_at(nested, state.get(name), address.clone().field(name.clone()))?;
            }
            Ok(())
        }
        Model::Array(slots) => {
            if !state.is_array() {
                return Err(Error::shape(address, "array", state.kind_name()));
            }
            for (i, nested) in slots.iter().enumerate() {
                validate_at(nested, state.at(i), address.clone().index(i))?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::model::{array_of, component, object_of, Component, ComponentDef};

    fn widget() -> Component {
        Component::new(ComponentDef {
            name: Some("widget".into()),
            ..Default::default()
        })
        .unwrap()
    }

    fn model() -> Model {
        let root = Component::new(ComponentDef {
            name: Some("root".into()),
            model: Some(Model::Object(IndexMap::from([
                ("rows".to_string(), array_of(widget())),
                ("panes".to_string(), object_of(widget())),
            ]))),
            ..Default::default()
        })
        .unwrap();
        component(root)
    }

    #[test]
    fn test_conforming_state() {
        let state: Value = serde_json::json!({
            "rows": [{"w": 1}, {"w": 2}],
            "panes": {"left": {"w": 3}},
            "extra_key_is_ignored": 42,
        })
        .into();
        validate_shape(&model(), &state).unwrap();
    }

    #[test]
    fn test_null_and_absent_members_validate() {
        let state: Value = serde_json::json!({"rows": [null, {"w": 1}], "panes": null}).into();
        validate_shape(&model(), &state).unwrap();
        validate_shape(&model(), &Value::null()).unwrap();
    }

    #[test]
    fn test_array_collection_rejects_object_state() {
        let state: Value = serde_json::json!({"rows": {"0": {"w": 1}}}).into();
        let err = validate_shape(&model(), &state).unwrap_err();
        match err {
            Error::ShapeMismatch { address, expected, found } => {
                assert_eq!(address, Address::root().field("rows"));
                assert_eq!(expected, "array");
                assert_eq!(found, "object");
            }
            other => panic!("expected ShapeMismatch, got {other}"),
        }
    }

    #[test]
    fn test_grouping_rejects_scalar_state() {
        let state: Value = serde_json::json!(10).into();
        let err = validate_shape(&model(), &state).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { address, .. } if address.is_root()));
    }
}
