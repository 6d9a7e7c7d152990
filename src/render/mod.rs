//! Render walker - drives lifecycle hooks off a diff subtree.
//!
//! The walker owns the binding tree: at every component address it stores
//! the opaque handle ([`Binding`]) the component renders into, plus the
//! subtree of its children's bindings. The core never interprets a
//! binding; it only routes it - the handle a parent's `render` returns for
//! a child slot becomes that child's `el` input.
//!
//! Hook dispatch per diff tag:
//! - CREATE: `will_mount`, `render`, `did_mount`, then descend. `render`
//!   always runs on create; `should_update` is never consulted.
//! - UPDATE: `should_update` gate (default true). When it refuses, the
//!   node and its whole subtree are skipped this transition - bindings
//!   kept, no hooks, no descent. Otherwise `will_update`, `render`,
//!   `did_update`, then descend with the fresh bindings.
//! - DESTROY: live children are unmounted first, then `will_unmount`;
//!   `render` is not invoked and the binding is dropped.
//! - unchanged: nothing fires at or below the node.

use std::any::Any;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use crate::address::{Address, Key};
use crate::diff::{Diff, DiffTag};
use crate::error::{Error, Result};
use crate::model::{Component, Model};
use crate::signal::{SignalNode, SignalTree};
use crate::value::Value;

/// Opaque render target handle. The embedding application decides what
/// this actually is; the core only stores and routes it.
pub type Binding = Rc<dyn Any>;

/// What lifecycle hooks receive.
pub struct HookInput {
    pub address: Address,
    /// The component's local state (new state, except `will_unmount` which
    /// sees the state being destroyed).
    pub state: Value,
    /// The binding the parent designated for this component.
    pub el: Option<Binding>,
    /// This instance's signal surface, once the signal graph has it.
    pub signals: Option<Rc<SignalNode>>,
}

/// Model-shaped tree of bindings. `Node` marks a component position: the
/// binding it received plus its children's subtree. Render hooks return
/// the `Leaf`/`Object`/`Array` forms.
#[derive(Clone, Default)]
pub enum BindingTree {
    #[default]
    Absent,
    Leaf(Binding),
    Node {
        el: Option<Binding>,
        children: Box<BindingTree>,
    },
    Object(IndexMap<String, BindingTree>),
    Array(Vec<BindingTree>),
}

impl BindingTree {
    /// Wrap any value as a single binding.
    pub fn leaf(binding: impl Any) -> Self {
        BindingTree::Leaf(Rc::new(binding))
    }

    /// Build the object form from named bindings.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, BindingTree)>) -> Self {
        BindingTree::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn get(&self, name: &str) -> Option<&BindingTree> {
        match self {
            BindingTree::Object(map) => map.get(name),
            _ => None,
        }
    }

    pub fn at(&self, i: usize) -> Option<&BindingTree> {
        match self {
            BindingTree::Array(items) => items.get(i),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&Binding> {
        match self {
            BindingTree::Leaf(binding) => Some(binding),
            _ => None,
        }
    }

    /// The binding held by the component at `address`, if one is live.
    pub fn el_at(&self, address: &Address) -> Option<&Binding> {
        match self.subtree_at(address.keys())? {
            BindingTree::Node { el, .. } => el.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn subtree_at(&self, keys: &[Key]) -> Option<&BindingTree> {
        if keys.is_empty() {
            return Some(self);
        }
        match self {
            BindingTree::Node { children, .. } => children.subtree_at(keys),
            BindingTree::Object(map) => match &keys[0] {
                Key::Field(name) => map.get(name)?.subtree_at(&keys[1..]),
                Key::Index(_) => None,
            },
            BindingTree::Array(items) => match keys[0] {
                Key::Index(i) => items.get(i)?.subtree_at(&keys[1..]),
                Key::Field(_) => None,
            },
            _ => None,
        }
    }

    /// Replace the subtree at `address`, creating grouping levels as
    /// needed. Used by the run loop to splice a re-walked minimal subtree
    /// back into the persistent tree.
    pub(crate) fn splice(&mut self, address: &Address, subtree: BindingTree) {
        splice_keys(self, address.keys(), subtree);
    }

    fn stored_el(&self) -> Option<Binding> {
        match self {
            BindingTree::Node { el, .. } => el.clone(),
            _ => None,
        }
    }
}

fn splice_keys(tree: &mut BindingTree, keys: &[Key], subtree: BindingTree) {
    let Some((key, rest)) = keys.split_first() else {
        *tree = subtree;
        return;
    };
    match tree {
        BindingTree::Node { children, .. } => splice_keys(children, keys, subtree),
        BindingTree::Object(map) => {
            if let Key::Field(name) = key {
                splice_keys(map.entry(name.clone()).or_default(), rest, subtree);
            }
        }
        BindingTree::Array(items) => {
            if let Key::Index(i) = key {
                if let Some(slot) = items.get_mut(*i) {
                    splice_keys(slot, rest, subtree);
                } else if *i == items.len() {
                    let mut slot = BindingTree::Absent;
                    splice_keys(&mut slot, rest, subtree);
                    items.push(slot);
                }
            }
        }
        other => {
            // Growing through an absent level: materialize the grouping.
            let mut fresh = match key {
                Key::Field(_) => BindingTree::Object(IndexMap::new()),
                Key::Index(_) => BindingTree::Array(Vec::new()),
            };
            splice_keys(&mut fresh, keys, subtree);
            *other = fresh;
        }
    }
}

// =============================================================================
// Render-result shape check
// =============================================================================

/// Validate what a render hook returned against the component's nested
/// model: object collections take an object of bindings, array collections
/// an array, a single nested component a single binding. A missing binding
/// is tolerated only where nothing in the nested subtree renders.
pub fn check_render_result(
    nested: Option<&Model>,
    rendered: &BindingTree,
    address: &Address,
) -> Result<()> {
    match nested {
        // Childless components may return anything; nothing routes it.
        None => Ok(()),
        Some(model) => check_against(model, rendered, address),
    }
}

fn check_against(model: &Model, rendered: &BindingTree, address: &Address) -> Result<()> {
    if matches!(rendered, BindingTree::Absent) {
        return if model.needs_binding() {
            Err(Error::shape(address.clone(), "binding", "absent"))
        } else {
            Ok(())
        };
    }
    match model {
        Model::Component(c) => match rendered {
            BindingTree::Leaf(_) => Ok(()),
            _ => {
                if c.has_render() || c.nested().is_some_and(Model::needs_binding) {
                    Err(Error::shape(address.clone(), "single binding", rendered.shape_name()))
                } else {
                    Ok(())
                }
            }
        },
        Model::ObjectOf(c) => match rendered {
            BindingTree::Object(members) => {
                for (name, member) in members {
                    check_member(c, member, &address.clone().field(name.clone()))?;
                }
                Ok(())
            }
            _ => Err(Error::shape(address.clone(), "object of bindings", rendered.shape_name())),
        },
        Model::ArrayOf(c) => match rendered {
            BindingTree::Array(members) => {
                for (i, member) in members.iter().enumerate() {
                    check_member(c, member, &address.clone().index(i))?;
                }
                Ok(())
            }
            _ => Err(Error::shape(address.clone(), "array of bindings", rendered.shape_name())),
        },
        Model::Object(fields) => match rendered {
            BindingTree::Object(entries) => {
                for (name, nested) in fields {
                    match entries.get(name) {
                        Some(entry) => {
                            check_against(nested, entry, &address.clone().field(name.clone()))?
                        }
                        None if !nested.needs_binding() => {}
                        None => {
                            return Err(Error::shape(
                                address.clone().field(name.clone()),
                                "binding",
                                "absent",
                            ));
                        }
                    }
                }
                // Extra entries the model does not mention are ignored,
                // like extra state keys.
                Ok(())
            }
            _ => Err(Error::shape(address.clone(), "object of bindings", rendered.shape_name())),
        },
        Model::Array(slots) => match rendered {
            BindingTree::Array(entries) => {
                for (i, nested) in slots.iter().enumerate() {
                    match entries.get(i) {
                        Some(entry) => check_against(nested, entry, &address.clone().index(i))?,
                        None if !nested.needs_binding() => {}
                        None => {
                            return Err(Error::shape(address.clone().index(i), "binding", "absent"));
                        }
                    }
                }
                Ok(())
            }
            _ => Err(Error::shape(address.clone(), "array of bindings", rendered.shape_name())),
        },
    }
}

fn check_member(c: &Rc<Component>, member: &BindingTree, address: &Address) -> Result<()> {
    match member {
        BindingTree::Leaf(_) => Ok(()),
        BindingTree::Absent if !Model::Component(c.clone()).needs_binding() => Ok(()),
        BindingTree::Absent => Err(Error::shape(address.clone(), "binding", "absent")),
        other => Err(Error::shape(address.clone(), "single binding", other.shape_name())),
    }
}

impl BindingTree {
    fn shape_name(&self) -> &'static str {
        match self {
            BindingTree::Absent => "absent",
            BindingTree::Leaf(_) => "single binding",
            BindingTree::Node { .. } => "component node",
            BindingTree::Object(_) => "object of bindings",
            BindingTree::Array(_) => "array of bindings",
        }
    }
}

// =============================================================================
// Walker
// =============================================================================

/// Re-render the subtree at `address` according to `diff`.
///
/// `prev` is the existing binding subtree there, `parent_el` the binding
/// the subtree root renders into (the mount target at the tree root, the
/// stored binding when re-walking a sliced subtree), and `signals` the
/// already-merged signal subtree at the same address.
pub fn update_tree(
    model: &Model,
    diff: &Diff,
    new_state: Option<&Value>,
    old_state: Option<&Value>,
    prev: &BindingTree,
    parent_el: Option<Binding>,
    address: &Address,
    signals: &SignalTree,
) -> Result<BindingTree> {
    match model {
        Model::Component(c) => {
            walk_node(c, diff, new_state, old_state, prev, parent_el, address, signals)
        }
        _ => walk_children(model, diff, new_state, old_state, prev, None, address, signals),
    }
}

#[allow(clippy::too_many_arguments)]
fn walk_node(
    c: &Rc<Component>,
    diff: &Diff,
    new_state: Option<&Value>,
    old_state: Option<&Value>,
    prev: &BindingTree,
    el: Option<Binding>,
    address: &Address,
    signals: &SignalTree,
) -> Result<BindingTree> {
    let Diff::Node { tag, children } = diff else {
        return Err(Error::shape(address.clone(), "component diff", "non-component diff"));
    };
    let (signal_node, signal_children) = match signals {
        SignalTree::Node { node, children } => (Some(node.clone()), Some(children.as_ref())),
        _ => (None, None),
    };

    match tag {
        DiffTag::Unchanged => Ok(prev.clone()),

        DiffTag::Create => {
            trace!(target: "trellis::render", component = c.name(), %address, "mount");
            let new_state = new_state.cloned().unwrap_or_else(Value::null);
            let input = HookInput {
                address: address.clone(),
                state: new_state,
                el: el.clone(),
                signals: signal_node,
            };
            if let Some(hook) = &c.will_mount {
                hook(&input);
            }
            let rendered = match &c.render {
                Some(render) => render(&input),
                None => BindingTree::Absent,
            };
            check_render_result(c.nested(), &rendered, address)?;
            if let Some(hook) = &c.did_mount {
                hook(&input);
            }

            let children = match (c.nested(), children) {
                (Some(nested), Some(child_diff)) => walk_children(
                    nested,
                    child_diff,
                    Some(&input.state),
                    None,
                    &BindingTree::Absent,
                    Some(&rendered),
                    address,
                    signal_children.unwrap_or(&SignalTree::Absent),
                )?,
                _ => BindingTree::Absent,
            };
            Ok(BindingTree::Node {
                el,
                children: Box::new(children),
            })
        }

        DiffTag::Update => {
            let new = new_state.cloned().unwrap_or_else(Value::null);
            let old = old_state.cloned().unwrap_or_else(Value::null);
            if let Some(gate) = &c.should_update {
                if !gate(&new, &old) {
                    // Binding kept, nothing fires, no descent.
                    return Ok(prev.clone());
                }
            }
            trace!(target: "trellis::render", component = c.name(), %address, "update");
            let el = el.or_else(|| prev.stored_el());
            let input = HookInput {
                address: address.clone(),
                state: new,
                el: el.clone(),
                signals: signal_node,
            };
            if let Some(hook) = &c.will_update {
                hook(&input);
            }
            let rendered = match &c.render {
                Some(render) => render(&input),
                None => BindingTree::Absent,
            };
            check_render_result(c.nested(), &rendered, address)?;
            if let Some(hook) = &c.did_update {
                hook(&input);
            }

            let prev_children = match prev {
                BindingTree::Node { children, .. } => children.as_ref(),
                _ => &BindingTree::Absent,
            };
            let children = match (c.nested(), children) {
                (Some(nested), Some(child_diff)) => walk_children(
                    nested,
                    child_diff,
                    Some(&input.state),
                    old_state,
                    prev_children,
                    Some(&rendered),
                    address,
                    signal_children.unwrap_or(&SignalTree::Absent),
                )?,
                _ => prev_children.clone(),
            };
            Ok(BindingTree::Node {
                el,
                children: Box::new(children),
            })
        }

        DiffTag::Destroy => {
            trace!(target: "trellis::render", component = c.name(), %address, "unmount");
            let prev_children = match prev {
                BindingTree::Node { children, .. } => children.as_ref(),
                _ => &BindingTree::Absent,
            };
            // Children before parent.
            if let (Some(nested), Some(child_diff)) = (c.nested(), children) {
                walk_children(
                    nested,
                    child_diff,
                    None,
                    old_state,
                    prev_children,
                    None,
                    address,
                    signal_children.unwrap_or(&SignalTree::Absent),
                )?;
            }
            if let Some(hook) = &c.will_unmount {
                let input = HookInput {
                    address: address.clone(),
                    state: old_state.cloned().unwrap_or_else(Value::null),
                    el: el.or_else(|| prev.stored_el()),
                    signals: signal_node,
                };
                hook(&input);
            }
            Ok(BindingTree::Absent)
        }
    }
}

/// Pick the `el` for a child slot: the binding the parent just rendered
/// for it, falling back to the one stored from the previous pass.
fn slot_el(rendered: Option<&BindingTree>, prev: &BindingTree) -> Option<Binding> {
    match rendered {
        Some(BindingTree::Leaf(binding)) => Some(binding.clone()),
        _ => prev.stored_el(),
    }
}

#[allow(clippy::too_many_arguments)]
fn walk_children(
    model: &Model,
    diff: &Diff,
    new_state: Option<&Value>,
    old_state: Option<&Value>,
    prev: &BindingTree,
    rendered: Option<&BindingTree>,
    address: &Address,
    signals: &SignalTree,
) -> Result<BindingTree> {
    let new_state = new_state.filter(|v| !v.is_null());
    let old_state = old_state.filter(|v| !v.is_null());

    match (model, diff) {
        (Model::Component(c), Diff::Node { .. }) => {
            let el = slot_el(rendered, prev);
            walk_node(c, diff, new_state, old_state, prev, el, address, signals)
        }

        (Model::ObjectOf(c), Diff::ObjectOf(members)) => {
            let mut out = IndexMap::new();
            for (name, member_diff) in members {
                let member_prev = prev.get(name).cloned().unwrap_or_default();
                let member_rendered = rendered.and_then(|r| r.get(name));
                let member_signals = match signals {
                    SignalTree::ObjectOf(map) => map.get(name),
                    _ => None,
                };
                let member_address = address.clone().field(name.clone());
                let walked = walk_node(
                    c,
                    member_diff,
                    new_state.and_then(|s| s.get(name)),
                    old_state.and_then(|s| s.get(name)),
                    &member_prev,
                    slot_el(member_rendered, &member_prev),
                    &member_address,
                    member_signals.unwrap_or(&SignalTree::Absent),
                )?;
                if !matches!(walked, BindingTree::Absent) {
                    out.insert(name.clone(), walked);
                }
            }
            // Live members a sliced diff did not mention keep their bindings.
            if let BindingTree::Object(prev_map) = prev {
                for (name, entry) in prev_map {
                    if !members.contains_key(name) {
                        out.insert(name.clone(), entry.clone());
                    }
                }
            }
            Ok(BindingTree::Object(out))
        }

        (Model::ArrayOf(c), Diff::ArrayOf(members)) => {
            let len = members.keys().next_back().map_or(0, |last| last + 1);
            let prev_len = match prev {
                BindingTree::Array(items) => items.len(),
                _ => 0,
            };
            let mut out: Vec<BindingTree> = Vec::with_capacity(len.max(prev_len));
            for i in 0..len.max(prev_len) {
                let member_prev = prev.at(i).cloned().unwrap_or_default();
                let Some(member_diff) = members.get(&i) else {
                    out.push(member_prev);
                    continue;
                };
                let member_rendered = rendered.and_then(|r| r.at(i));
                let member_signals = match signals {
                    SignalTree::ArrayOf(map) => map.get(&i),
                    _ => None,
                };
                let member_address = address.clone().index(i);
                out.push(walk_node(
                    c,
                    member_diff,
                    new_state.and_then(|s| s.at(i)),
                    old_state.and_then(|s| s.at(i)),
                    &member_prev,
                    slot_el(member_rendered, &member_prev),
                    &member_address,
                    member_signals.unwrap_or(&SignalTree::Absent),
                )?);
            }
            // Trim trailing absents left by destroyed tail members.
            while matches!(out.last(), Some(BindingTree::Absent)) {
                out.pop();
            }
            Ok(BindingTree::Array(out))
        }

        (Model::Object(fields), Diff::Object(field_diffs)) => {
            let mut out = IndexMap::new();
            for (name, nested) in fields {
                let field_prev = prev.get(name).cloned().unwrap_or_default();
                let Some(field_diff) = field_diffs.get(name) else {
                    out.insert(name.clone(), field_prev);
                    continue;
                };
                let walked = walk_children(
                    nested,
                    field_diff,
                    new_state.and_then(|s| s.get(name)),
                    old_state.and_then(|s| s.get(name)),
                    &field_prev,
                    rendered.and_then(|r| r.get(name)),
                    &address.clone().field(name.clone()),
                    match signals {
                        SignalTree::Object(map) => map.get(name).unwrap_or(&SignalTree::Absent),
                        _ => &SignalTree::Absent,
                    },
                )?;
                out.insert(name.clone(), walked);
            }
            Ok(BindingTree::Object(out))
        }

        (Model::Array(slots), Diff::Array(slot_diffs)) => {
            let mut out = Vec::with_capacity(slots.len());
            for (i, nested) in slots.iter().enumerate() {
                let slot_prev = prev.at(i).cloned().unwrap_or_default();
                let Some(slot_diff) = slot_diffs.get(i) else {
                    out.push(slot_prev);
                    continue;
                };
                out.push(walk_children(
                    nested,
                    slot_diff,
                    new_state.and_then(|s| s.at(i)),
                    old_state.and_then(|s| s.at(i)),
                    &slot_prev,
                    rendered.and_then(|r| r.at(i)),
                    &address.clone().index(i),
                    match signals {
                        SignalTree::Array(items) => items.get(i).unwrap_or(&SignalTree::Absent),
                        _ => &SignalTree::Absent,
                    },
                )?);
            }
            Ok(BindingTree::Array(out))
        }

        _ => Err(Error::shape(address.clone(), "model-shaped diff", "mismatched diff")),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::diff::diff_full;
    use crate::model::{array_of, component, Component, ComponentDef};

    type Log = Rc<RefCell<Vec<String>>>;

    fn logging_leaf(log: &Log, tag: &str, should_update: Option<bool>) -> Component {
        let t = |event: &str| {
            let log = log.clone();
            let label = format!("{tag}:{event}");
            Rc::new(move |_: &HookInput| log.borrow_mut().push(label.clone()))
        };
        let render_log = log.clone();
        let render_label = format!("{tag}:render");
        Component::new(ComponentDef {
            name: Some(tag.into()),
            will_mount: Some(t("will_mount")),
            did_mount: Some(t("did_mount")),
            will_update: Some(t("will_update")),
            did_update: Some(t("did_update")),
            will_unmount: Some(t("will_unmount")),
            render: Some(Rc::new(move |_| {
                render_log.borrow_mut().push(render_label.clone());
                BindingTree::Absent
            })),
            should_update: should_update.map(|answer| {
                let hook: crate::model::ShouldUpdateHook = Rc::new(move |_, _| answer);
                hook
            }),
            ..Default::default()
        })
        .unwrap()
    }

    fn walk(model: &Model, new: &Value, old: Option<&Value>, prev: &BindingTree) -> BindingTree {
        let result = diff_full(model, new, old).unwrap();
        update_tree(
            model,
            &result.tree,
            Some(new),
            old,
            prev,
            None,
            &Address::root(),
            &SignalTree::Absent,
        )
        .unwrap()
    }

    #[test]
    fn test_create_order_and_always_renders() {
        let log: Log = Default::default();
        // should_update = false must not suppress the initial render.
        let leaf = logging_leaf(&log, "c", Some(false));
        let model = component(leaf);
        let state: Value = serde_json::json!({"v": 1}).into();

        walk(&model, &state, None, &BindingTree::Absent);
        assert_eq!(
            *log.borrow(),
            vec!["c:will_mount", "c:render", "c:did_mount"]
        );
    }

    #[test]
    fn test_update_order() {
        let log: Log = Default::default();
        let model = component(logging_leaf(&log, "c", None));
        let old: Value = serde_json::json!({"v": 1}).into();
        let new: Value = serde_json::json!({"v": 2}).into();

        let tree = walk(&model, &old, None, &BindingTree::Absent);
        log.borrow_mut().clear();
        walk(&model, &new, Some(&old), &tree);
        assert_eq!(
            *log.borrow(),
            vec!["c:will_update", "c:render", "c:did_update"]
        );
    }

    #[test]
    fn test_should_update_false_skips_node_and_subtree() {
        let log: Log = Default::default();
        let child = logging_leaf(&log, "kid", None);
        let parent = Component::new(ComponentDef {
            name: Some("parent".into()),
            model: Some(Model::Object(IndexMap::from([(
                "kids".to_string(),
                array_of(child),
            )]))),
            should_update: Some(Rc::new(|_, _| false)),
            will_update: Some({
                let log = log.clone();
                Rc::new(move |_: &HookInput| log.borrow_mut().push("parent:will_update".into()))
            }),
            ..Default::default()
        })
        .unwrap();
        let model = component(parent);

        let old: Value = serde_json::json!({"kids": [{"v": 1}]}).into();
        let tree = walk(&model, &old, None, &BindingTree::Absent);
        log.borrow_mut().clear();

        // Both the parent and the child state changed, but the gate refuses.
        let new: Value = serde_json::json!({"kids": [{"v": 2}]}).into();
        let after = walk(&model, &new, Some(&old), &tree);
        assert!(log.borrow().is_empty());
        // Subtree kept as-is.
        assert!(matches!(after, BindingTree::Node { .. }));
    }

    #[test]
    fn test_destroy_unmounts_children_first() {
        let log: Log = Default::default();
        let child = logging_leaf(&log, "kid", None);
        let parent = Component::new(ComponentDef {
            name: Some("parent".into()),
            model: Some(Model::Object(IndexMap::from([(
                "kids".to_string(),
                array_of(child),
            )]))),
            will_unmount: Some({
                let log = log.clone();
                Rc::new(move |_: &HookInput| log.borrow_mut().push("parent:will_unmount".into()))
            }),
            ..Default::default()
        })
        .unwrap();
        let model = Model::Object(IndexMap::from([("p".to_string(), component(parent))]));

        let old: Value = serde_json::json!({"p": {"kids": [{"v": 1}, {"v": 2}]}}).into();
        let tree = walk(&model, &old, None, &BindingTree::Absent);
        log.borrow_mut().clear();

        let new: Value = serde_json::json!({}).into();
        walk(&model, &new, Some(&old), &tree);
        assert_eq!(
            *log.borrow(),
            vec![
                "kid:will_unmount",
                "kid:will_unmount",
                "parent:will_unmount"
            ]
        );
    }

    #[test]
    fn test_unchanged_member_fires_nothing_and_keeps_binding() {
        let seq = Rc::new(RefCell::new(0u32));
        let counter = seq.clone();
        let child = Component::new(ComponentDef {
            name: Some("kid".into()),
            render: Some(Rc::new(move |_| {
                let mut n = counter.borrow_mut();
                *n += 1;
                BindingTree::leaf(*n)
            })),
            ..Default::default()
        })
        .unwrap();
        let model = Model::Object(IndexMap::from([("kids".to_string(), array_of(child))]));

        let old: Value = serde_json::json!({"kids": [{"v": 1}, {"v": 2}]}).into();
        let tree = walk(&model, &old, None, &BindingTree::Absent);

        // Replace member 1 only; member 0 keeps its node by identity.
        let kids = old.get("kids").unwrap().as_array().unwrap().clone();
        let new = Value::from_pairs([(
            "kids",
            Value::array(vec![kids[0].clone(), serde_json::json!({"v": 3}).into()]),
        )]);
        let after = walk(&model, &new, Some(&old), &tree);

        // Only member 1 re-rendered: the render counter ran twice on
        // mount plus once for the replacement.
        assert_eq!(*seq.borrow(), 3);
        assert!(matches!(
            after.get("kids").and_then(|k| k.at(0)),
            Some(BindingTree::Node { .. })
        ));
    }

    #[test]
    fn test_check_render_result_shapes() {
        let drawn = Component::new(ComponentDef {
            name: Some("drawn".into()),
            render: Some(Rc::new(|_| BindingTree::Absent)),
            ..Default::default()
        })
        .unwrap();
        let nested = Model::Object(IndexMap::from([("kids".to_string(), array_of(drawn))]));

        // Array collection wants an array of bindings.
        let ok = BindingTree::object([(
            "kids",
            BindingTree::Array(vec![BindingTree::leaf(1u8), BindingTree::leaf(2u8)]),
        )]);
        check_render_result(Some(&nested), &ok, &Address::root()).unwrap();

        let wrong = BindingTree::object([("kids", BindingTree::leaf(1u8))]);
        let err = check_render_result(Some(&nested), &wrong, &Address::root()).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));

        // Absent tolerated only when nothing in the subtree renders.
        let silent = Component::new(ComponentDef {
            name: Some("silent".into()),
            ..Default::default()
        })
        .unwrap();
        let quiet_nested = Model::Object(IndexMap::from([("kids".to_string(), array_of(silent))]));
        check_render_result(Some(&quiet_nested), &BindingTree::Absent, &Address::root()).unwrap();
        let err =
            check_render_result(Some(&nested), &BindingTree::Absent, &Address::root()).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_el_routing_from_parent_render() {
        let seen: Rc<RefCell<Vec<String>>> = Default::default();
        let sink = seen.clone();
        let child = Component::new(ComponentDef {
            name: Some("kid".into()),
            render: Some(Rc::new(move |input: &HookInput| {
                let el = input
                    .el
                    .as_ref()
                    .and_then(|el| el.downcast_ref::<String>())
                    .cloned()
                    .unwrap_or_default();
                sink.borrow_mut().push(el);
                BindingTree::Absent
            })),
            ..Default::default()
        })
        .unwrap();
        let parent = Component::new(ComponentDef {
            name: Some("parent".into()),
            model: Some(Model::Object(IndexMap::from([(
                "kids".to_string(),
                array_of(child),
            )]))),
            render: Some(Rc::new(|input: &HookInput| {
                let count = input
                    .state
                    .get("kids")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                BindingTree::object([(
                    "kids",
                    BindingTree::Array(
                        (0..count)
                            .map(|i| BindingTree::leaf(format!("slot-{i}")))
                            .collect(),
                    ),
                )])
            })),
            ..Default::default()
        })
        .unwrap();
        let model = component(parent);

        let state: Value = serde_json::json!({"kids": [{"v": 0}, {"v": 1}]}).into();
        walk(&model, &state, None, &BindingTree::Absent);
        assert_eq!(*seen.borrow(), vec!["slot-0", "slot-1"]);
    }
}
