//! Diff engine - classifies one state transition against the model.
//!
//! [`diff`] walks model/new-state/old-state in lockstep and produces a
//! model-shaped [`Diff`] tree tagging every component position
//! CREATE/UPDATE/DESTROY/unchanged, plus the *minimal address*: the deepest
//! single address whose subtree contains every change. The render walker
//! and the signal-graph merge both consume the same diff tree and both
//! confine their work to that subtree - nodes outside it are never
//! touched, re-rendered, or re-wired.
//!
//! Classification is by reference equality ([`Value::same`]): the
//! persistent state setter copies exactly the nodes on the written path,
//! so an untouched member still shares its node with the previous snapshot
//! and classifies as unchanged without any deep comparison.
//!
//! `null` and a missing key/index are the same thing throughout: "no
//! instance exists at this address".

use std::collections::BTreeMap;

use indexmap::{IndexMap, IndexSet};

use crate::address::{Address, Key};
use crate::error::{Error, Result};
use crate::model::Model;
use crate::value::Value;

/// Per-node classification for one transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffTag {
    Create,
    Update,
    Destroy,
    Unchanged,
}

/// Model-shaped diff tree for one transition. Produced fresh by [`diff`],
/// never mutated, discarded when the transition completes.
#[derive(Clone, Debug)]
pub enum Diff {
    /// A component position: its tag, and the diff of its nested model
    /// (absent for unchanged nodes - nothing below them is descended).
    Node {
        tag: DiffTag,
        children: Option<Box<Diff>>,
    },
    /// Members of a string-keyed collection. Members absent from both
    /// snapshots are omitted.
    ObjectOf(IndexMap<String, Diff>),
    /// Members of an index-keyed collection, sparse over the index union.
    ArrayOf(BTreeMap<usize, Diff>),
    /// Structural grouping by field; no tag of its own.
    Object(IndexMap<String, Diff>),
    /// Structural grouping by position; no tag of its own.
    Array(Vec<Diff>),
}

impl Diff {
    /// The tag at a component position; `None` for groupings/collections.
    pub fn tag(&self) -> Option<DiffTag> {
        match self {
            Diff::Node { tag, .. } => Some(*tag),
            _ => None,
        }
    }

    /// True when no CREATE/UPDATE/DESTROY appears anywhere in the subtree.
    pub fn is_unchanged(&self) -> bool {
        match self {
            Diff::Node { tag, children } => {
                *tag == DiffTag::Unchanged
                    && children.as_ref().is_none_or(|c| c.is_unchanged())
            }
            Diff::ObjectOf(members) | Diff::Object(members) => {
                members.values().all(Diff::is_unchanged)
            }
            Diff::ArrayOf(members) => members.values().all(Diff::is_unchanged),
            Diff::Array(items) => items.iter().all(Diff::is_unchanged),
        }
    }

    /// Resolve the diff subtree at `address` (same address space as the
    /// model). A component node's children diff lives at the component's
    /// own address, so descent through `Node` does not consume a key.
    pub fn at(&self, address: &Address) -> Option<&Diff> {
        self.at_keys(address.keys())
    }

    fn at_keys(&self, keys: &[Key]) -> Option<&Diff> {
        if keys.is_empty() {
            return Some(self);
        }
        match self {
            Diff::Node { children, .. } => children.as_ref()?.at_keys(keys),
            Diff::ObjectOf(members) | Diff::Object(members) => match &keys[0] {
                Key::Field(name) => members.get(name)?.at_keys(&keys[1..]),
                Key::Index(_) => None,
            },
            Diff::ArrayOf(members) => match keys[0] {
                Key::Index(i) => members.get(&i)?.at_keys(&keys[1..]),
                Key::Field(_) => None,
            },
            Diff::Array(items) => match keys[0] {
                Key::Index(i) => items.get(i)?.at_keys(&keys[1..]),
                Key::Field(_) => None,
            },
        }
    }
}

/// The deepest address containing every change, with the model node there.
#[derive(Clone, Debug)]
pub struct MinSubtree {
    pub address: Address,
    pub model: Model,
}

/// Output of one [`diff`] call.
#[derive(Debug)]
pub struct DiffResult {
    pub tree: Diff,
    /// Minimal subtree for the signal-graph consumer, rooted under the
    /// signal starting address.
    pub min_signals: Option<MinSubtree>,
    /// Minimal subtree for the render consumer, rooted under the update
    /// starting address. Computed from the same pass as `min_signals`;
    /// the two agree up to their starting prefixes.
    pub min_update: Option<MinSubtree>,
}

/// Compare two state snapshots against `model`.
///
/// `signal_address` and `update_address` are the starting prefixes the two
/// consumers have threaded in; the returned minimal addresses are relative
/// LCAs joined onto them. `None`/null old state means first mount: every
/// present member classifies CREATE, recursively.
pub fn diff(
    model: &Model,
    new_state: Option<&Value>,
    old_state: Option<&Value>,
    signal_address: &Address,
    update_address: &Address,
) -> Result<DiffResult> {
    let mut acc = ChangeAccumulator::default();
    let tree = walk(model, new_state, old_state, &Address::root(), &mut acc)?;

    let (min_signals, min_update) = match acc.lca {
        None => (None, None),
        Some(lca) => {
            let model_at = model
                .at(&lca)
                .unwrap_or_else(|| model.clone());
            let signals = MinSubtree {
                address: signal_address.join(&lca),
                model: model_at.clone(),
            };
            let update = MinSubtree {
                address: update_address.join(&lca),
                model: model_at,
            };
            (Some(signals), Some(update))
        }
    };

    Ok(DiffResult {
        tree,
        min_signals,
        min_update,
    })
}

/// Convenience wrapper with root starting addresses.
pub fn diff_full(model: &Model, new_state: &Value, old_state: Option<&Value>) -> Result<DiffResult> {
    diff(
        model,
        Some(new_state),
        old_state,
        &Address::root(),
        &Address::root(),
    )
}

/// Folds the lowest common ancestor of every changed address.
#[derive(Default)]
struct ChangeAccumulator {
    lca: Option<Address>,
}

impl ChangeAccumulator {
    fn note(&mut self, address: &Address) {
        self.lca = Some(match self.lca.take() {
            None => address.clone(),
            Some(prev) => prev.common_prefix(address),
        });
    }
}

/// "This instance exists": key present and value non-null.
fn present(state: Option<&Value>) -> bool {
    state.is_some_and(|v| !v.is_null())
}

fn walk(
    model: &Model,
    new: Option<&Value>,
    old: Option<&Value>,
    address: &Address,
    acc: &mut ChangeAccumulator,
) -> Result<Diff> {
    match model {
        Model::Component(c) => {
            let new = new.filter(|v| !v.is_null());
            let old = old.filter(|v| !v.is_null());
            let tag = match (new, old) {
                (Some(_), None) => DiffTag::Create,
                (None, Some(_)) => DiffTag::Destroy,
                (Some(n), Some(o)) if !n.same(o) => DiffTag::Update,
                _ => DiffTag::Unchanged,
            };

            if tag == DiffTag::Unchanged {
                return Ok(Diff::Node {
                    tag,
                    children: None,
                });
            }
            acc.note(address);

            // Create diffs against an absent past, destroy against an
            // absent future, so nested lifecycles fire recursively.
            let (sub_new, sub_old) = match tag {
                DiffTag::Create => (new, None),
                DiffTag::Destroy => (None, old),
                _ => (new, old),
            };
            let children = match c.nested() {
                Some(nested) => Some(Box::new(walk(nested, sub_new, sub_old, address, acc)?)),
                None => None,
            };
            Ok(Diff::Node { tag, children })
        }

        Model::ObjectOf(c) => {
            let new_members = collection_object(new, address)?;
            let old_members = collection_object(old, address)?;

            // Union of keys, new snapshot's order first.
            let mut keys: IndexSet<&String> = IndexSet::new();
            keys.extend(new_members.iter().flat_map(|m| m.keys()));
            keys.extend(old_members.iter().flat_map(|m| m.keys()));

            let member_model = Model::Component(c.clone());
            let mut members = IndexMap::new();
            for key in keys {
                let n = new_members.and_then(|m| m.get(key));
                let o = old_members.and_then(|m| m.get(key));
                if !present(n) && !present(o) {
                    continue;
                }
                let member_address = address.clone().field(key.clone());
                members.insert(
                    key.clone(),
                    walk(&member_model, n, o, &member_address, acc)?,
                );
            }
            Ok(Diff::ObjectOf(members))
        }

        Model::ArrayOf(c) => {
            let new_members = collection_array(new, address)?;
            let old_members = collection_array(old, address)?;
            let len = new_members
                .map_or(0, Vec::len)
                .max(old_members.map_or(0, Vec::len));

            let member_model = Model::Component(c.clone());
            let mut members = BTreeMap::new();
            for i in 0..len {
                let n = new_members.and_then(|m| m.get(i));
                let o = old_members.and_then(|m| m.get(i));
                if !present(n) && !present(o) {
                    continue;
                }
                let member_address = address.clone().index(i);
                members.insert(i, walk(&member_model, n, o, &member_address, acc)?);
            }
            Ok(Diff::ArrayOf(members))
        }

        Model::Object(fields) => {
            let new = grouping_object(new, address)?;
            let old = grouping_object(old, address)?;
            let mut out = IndexMap::new();
            for (name, nested) in fields {
                let field_address = address.clone().field(name.clone());
                out.insert(
                    name.clone(),
                    walk(
                        nested,
                        new.and_then(|m| m.get(name)),
                        old.and_then(|m| m.get(name)),
                        &field_address,
                        acc,
                    )?,
                );
            }
            Ok(Diff::Object(out))
        }

        Model::Array(slots) => {
            let new = grouping_array(new, address)?;
            let old = grouping_array(old, address)?;
            let mut out = Vec::with_capacity(slots.len());
            for (i, nested) in slots.iter().enumerate() {
                let slot_address = address.clone().index(i);
                out.push(walk(
                    nested,
                    new.and_then(|m| m.get(i)),
                    old.and_then(|m| m.get(i)),
                    &slot_address,
                    acc,
                )?);
            }
            Ok(Diff::Array(out))
        }
    }
}

fn collection_object<'a>(
    state: Option<&'a Value>,
    address: &Address,
) -> Result<Option<&'a crate::value::ObjectMap>> {
    match state.filter(|v| !v.is_null()) {
        None => Ok(None),
        Some(v) => v
            .as_object()
            .map(Some)
            .ok_or_else(|| Error::shape(address.clone(), "object", v.kind_name())),
    }
}

fn collection_array<'a>(state: Option<&'a Value>, address: &Address) -> Result<Option<&'a Vec<Value>>> {
    match state.filter(|v| !v.is_null()) {
        None => Ok(None),
        Some(v) => v
            .as_array()
            .map(Some)
            .ok_or_else(|| Error::shape(address.clone(), "array", v.kind_name())),
    }
}

fn grouping_object<'a>(
    state: Option<&'a Value>,
    address: &Address,
) -> Result<Option<&'a crate::value::ObjectMap>> {
    collection_object(state, address)
}

fn grouping_array<'a>(state: Option<&'a Value>, address: &Address) -> Result<Option<&'a Vec<Value>>> {
    collection_array(state, address)
}

// =============================================================================
// Tests
// =============================================================================
