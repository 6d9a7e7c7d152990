//! Signal graph - per-instance event channels and the merge that keeps
//! them wired across tree mutations.
//!
//! Every component instance owns one [`Signal`] per declared channel name
//! plus a [`ChildSignals`] proxy shaped like its nested model. Parents
//! listen across a whole collection with [`ChildSignal::on_each`] and
//! broadcast to one live member with [`ChildSignal::call`]; members relay
//! their own emissions up through the proxy with the member key attached.
//!
//! [`merge_signals`] re-walks a diff subtree after each transition:
//! created instances get fresh channels and a one-time `signal_setup`
//! call, updated instances keep their channel objects (and therefore every
//! externally-registered listener, in order), destroyed members are
//! unlinked from their parent's proxy so future broadcasts silently skip
//! them, and unchanged subtrees pass through by identity.
//!
//! Listener registration is an append-only ordered registry. Registering
//! outside `signal_setup` while a transition is in flight is rejected -
//! the graph is mid-rewire and the registration would land on a
//! half-updated tree.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use crate::address::{Address, Key};
use crate::diff::{Diff, DiffTag};
use crate::error::{Error, Result};
use crate::model::Model;
use crate::value::Value;

/// Listener on one instance's channel.
pub type Listener = Rc<dyn Fn(&Value)>;
/// Collection-scoped listener; receives the emitting member's key.
pub type EachListener = Rc<dyn Fn(&Value, &Key)>;
/// Reducer dispatch the run loop hands to `merge_signals`: `(address,
/// reducer name, payload)`.
pub type Dispatcher = Rc<dyn Fn(&Address, &str, Value)>;

thread_local! {
    /// False while a transition is rewiring the graph; `signal_setup`
    /// reopens it for its own duration.
    static REGISTRATION_OPEN: Cell<bool> = const { Cell::new(true) };
}

pub(crate) fn lock_registration() {
    REGISTRATION_OPEN.with(|open| open.set(false));
}

pub(crate) fn unlock_registration() {
    REGISTRATION_OPEN.with(|open| open.set(true));
}

fn check_registration(signal: &str) -> Result<()> {
    if REGISTRATION_OPEN.with(Cell::get) {
        Ok(())
    } else {
        Err(Error::SignalUsage {
            signal: signal.to_string(),
            detail: "listener registered outside signal_setup during a transition".to_string(),
        })
    }
}

fn check_payload(signal: &str, payload: &Value) -> Result<()> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(Error::SignalUsage {
            signal: signal.to_string(),
            detail: format!("payload must be an object, got {}", payload.kind_name()),
        })
    }
}

// =============================================================================
// One channel
// =============================================================================

struct Uplink {
    proxy: Rc<ChildSignal>,
    key: Key,
}

/// One named channel on one component instance.
///
/// The channel object survives UPDATE reconciliations of its address, so
/// listeners registered here persist until the address is destroyed.
pub struct Signal {
    name: String,
    listeners: RefCell<Vec<Listener>>,
    uplink: RefCell<Option<Uplink>>,
}

impl Signal {
    fn new(name: &str) -> Rc<Self> {
        Rc::new(Signal {
            name: name.to_string(),
            listeners: RefCell::new(Vec::new()),
            uplink: RefCell::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a listener. Order of registration is invocation order.
    pub fn on(&self, listener: impl Fn(&Value) + 'static) -> Result<()> {
        check_registration(&self.name)?;
        self.listeners.borrow_mut().push(Rc::new(listener));
        Ok(())
    }

    /// Invoke every listener with one object-shaped payload, then relay to
    /// the parent's collection listeners with this member's key.
    pub fn call(&self, payload: &Value) -> Result<()> {
        check_payload(&self.name, payload)?;
        // Snapshot so a listener calling back in cannot alias the registry.
        let listeners: Vec<Listener> = self.listeners.borrow().clone();
        for listener in &listeners {
            listener(payload);
        }
        let uplink = self.uplink.borrow();
        if let Some(uplink) = uplink.as_ref() {
            uplink.proxy.notify_each(payload, &uplink.key);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

// =============================================================================
// Collection-aware proxy channel
// =============================================================================

/// The each-aware side of one child signal name on a parent's proxy.
///
/// `callers` is the per-member registry the merge maintains: one entry per
/// currently-live member, in creation order, surviving updates untouched.
pub struct ChildSignal {
    name: String,
    each_listeners: RefCell<Vec<EachListener>>,
    callers: RefCell<IndexMap<Key, Rc<Signal>>>,
}

impl ChildSignal {
    fn new(name: &str) -> Rc<Self> {
        Rc::new(ChildSignal {
            name: name.to_string(),
            each_listeners: RefCell::new(Vec::new()),
            callers: RefCell::new(IndexMap::new()),
        })
    }

    /// Listen across every current and future member of the collection.
    pub fn on_each(&self, listener: impl Fn(&Value, &Key) + 'static) -> Result<()> {
        check_registration(&self.name)?;
        self.each_listeners.borrow_mut().push(Rc::new(listener));
        Ok(())
    }

    /// Broadcast to one live member. A key with no live member is silently
    /// skipped - destroyed members stop hearing broadcasts, nothing more.
    pub fn call(&self, key: impl Into<Key>, payload: &Value) -> Result<()> {
        check_payload(&self.name, payload)?;
        let member = self.callers.borrow().get(&key.into()).cloned();
        match member {
            Some(signal) => signal.call(payload),
            None => Ok(()),
        }
    }

    /// Broadcast to every currently-live member, in creation order.
    pub fn call_all(&self, payload: &Value) -> Result<()> {
        check_payload(&self.name, payload)?;
        let members: Vec<Rc<Signal>> = self.callers.borrow().values().cloned().collect();
        for signal in members {
            signal.call(payload)?;
        }
        Ok(())
    }

    /// Number of live member callers.
    pub fn caller_count(&self) -> usize {
        self.callers.borrow().len()
    }

    fn notify_each(&self, payload: &Value, key: &Key) {
        let listeners: Vec<EachListener> = self.each_listeners.borrow().clone();
        for listener in &listeners {
            listener(payload, key);
        }
    }

    fn register(&self, key: Key, signal: Rc<Signal>) {
        self.callers.borrow_mut().insert(key, signal);
    }

    fn unregister(&self, key: &Key) {
        // shift_remove keeps the surviving members' relative order.
        self.callers.borrow_mut().shift_remove(key);
    }

    #[cfg(test)]
    pub(crate) fn caller_keys(&self) -> Vec<Key> {
        self.callers.borrow().keys().cloned().collect()
    }
}

// =============================================================================
// Proxy tree
// =============================================================================

/// Child-signals proxy, shaped like the component's nested model: grouping
/// levels mirror the groupings, and every component or collection position
/// exposes one [`ChildSignal`] per declared signal name.
pub enum ChildSignals {
    Object(IndexMap<String, ChildSignals>),
    Array(Vec<ChildSignals>),
    Child(IndexMap<String, Rc<ChildSignal>>),
}

impl ChildSignals {
    /// Derive the proxy shape from a nested model.
    pub(crate) fn from_model(model: Option<&Model>) -> Rc<Self> {
        Rc::new(match model {
            None => ChildSignals::Object(IndexMap::new()),
            Some(model) => Self::from_node(model),
        })
    }

    fn from_node(model: &Model) -> Self {
        match model {
            Model::Component(c) | Model::ObjectOf(c) | Model::ArrayOf(c) => ChildSignals::Child(
                c.signal_names()
                    .iter()
                    .map(|name| (name.clone(), ChildSignal::new(name)))
                    .collect(),
            ),
            Model::Object(fields) => ChildSignals::Object(
                fields
                    .iter()
                    .map(|(name, nested)| (name.clone(), Self::from_node(nested)))
                    .collect(),
            ),
            Model::Array(slots) => {
                ChildSignals::Array(slots.iter().map(Self::from_node).collect())
            }
        }
    }

    /// Descend one grouping field.
    pub fn child(&self, name: &str) -> Option<&ChildSignals> {
        match self {
            ChildSignals::Object(map) => map.get(name),
            _ => None,
        }
    }

    /// Descend one grouping slot.
    pub fn slot(&self, i: usize) -> Option<&ChildSignals> {
        match self {
            ChildSignals::Array(items) => items.get(i),
            _ => None,
        }
    }

    /// The each-aware API for one declared signal name at a component or
    /// collection position.
    pub fn signal(&self, name: &str) -> Option<&Rc<ChildSignal>> {
        match self {
            ChildSignals::Child(map) => map.get(name),
            _ => None,
        }
    }
}

// =============================================================================
// Per-instance node and tree
// =============================================================================

/// One instance's signal surface: its own channels plus the proxy over its
/// children.
pub struct SignalNode {
    signals: IndexMap<String, Rc<Signal>>,
    child_signals: Rc<ChildSignals>,
}

impl SignalNode {
    pub fn signal(&self, name: &str) -> Option<&Rc<Signal>> {
        self.signals.get(name)
    }

    pub fn child_signals(&self) -> &Rc<ChildSignals> {
        &self.child_signals
    }
}

/// Model-shaped tree of live signal nodes. Persistent across transitions;
/// mutated only at the addresses the diff names.
#[derive(Clone, Default)]
pub enum SignalTree {
    #[default]
    Absent,
    Node {
        node: Rc<SignalNode>,
        children: Box<SignalTree>,
    },
    ObjectOf(IndexMap<String, SignalTree>),
    ArrayOf(BTreeMap<usize, SignalTree>),
    Object(IndexMap<String, SignalTree>),
    Array(Vec<SignalTree>),
}

impl SignalTree {
    /// The signal node at `address`, if an instance is live there.
    pub fn node_at(&self, address: &Address) -> Option<&Rc<SignalNode>> {
        self.subtree_at(address.keys()).and_then(|t| match t {
            SignalTree::Node { node, .. } => Some(node),
            _ => None,
        })
    }

    pub(crate) fn subtree_at(&self, keys: &[Key]) -> Option<&SignalTree> {
        if keys.is_empty() {
            return Some(self);
        }
        match self {
            SignalTree::Absent => None,
            SignalTree::Node { children, .. } => children.subtree_at(keys),
            SignalTree::ObjectOf(map) | SignalTree::Object(map) => match &keys[0] {
                Key::Field(name) => map.get(name)?.subtree_at(&keys[1..]),
                Key::Index(_) => None,
            },
            SignalTree::ArrayOf(map) => match keys[0] {
                Key::Index(i) => map.get(&i)?.subtree_at(&keys[1..]),
                Key::Field(_) => None,
            },
            SignalTree::Array(items) => match keys[0] {
                Key::Index(i) => items.get(i)?.subtree_at(&keys[1..]),
                Key::Field(_) => None,
            },
        }
    }

    /// Replace the subtree at `address`, creating grouping levels as
    /// needed. Used by the run loop to splice a merged minimal subtree
    /// back into the persistent tree.
    pub(crate) fn splice(&mut self, address: &Address, subtree: SignalTree) {
        splice_keys(self, address.keys(), subtree);
    }
}

fn splice_keys(tree: &mut SignalTree, keys: &[Key], subtree: SignalTree) {
    let Some((key, rest)) = keys.split_first() else {
        *tree = subtree;
        return;
    };
    match tree {
        SignalTree::Node { children, .. } => splice_keys(children, keys, subtree),
        SignalTree::ObjectOf(map) | SignalTree::Object(map) => {
            if let Key::Field(name) = key {
                splice_keys(map.entry(name.clone()).or_default(), rest, subtree);
            }
        }
        SignalTree::ArrayOf(map) => {
            if let Key::Index(i) = key {
                splice_keys(map.entry(*i).or_default(), rest, subtree);
            }
        }
        SignalTree::Array(items) => {
            if let Key::Index(i) = key {
                if let Some(slot) = items.get_mut(*i) {
                    splice_keys(slot, rest, subtree);
                }
            }
        }
        SignalTree::Absent => {}
    }
}

// =============================================================================
// signal_setup context
// =============================================================================

/// Everything a component's `signal_setup` hook gets to wire with. Runs
/// exactly once per instance lifetime, at creation.
pub struct SignalSetup {
    pub address: Address,
    signals: Rc<SignalNode>,
    dispatcher: Dispatcher,
}

impl SignalSetup {
    /// One of this instance's own channels.
    pub fn signal(&self, name: &str) -> Result<&Rc<Signal>> {
        self.signals.signal(name).ok_or_else(|| Error::SignalUsage {
            signal: name.to_string(),
            detail: "not a declared signal of this component".to_string(),
        })
    }

    /// The proxy over this instance's children.
    pub fn child_signals(&self) -> &Rc<ChildSignals> {
        self.signals.child_signals()
    }

    /// Caller for one of this instance's own reducers; safe to capture in
    /// listeners (dispatch during a transition is queued, not re-entered).
    pub fn reducer_caller(&self, name: &str) -> impl Fn(Value) + 'static {
        let dispatcher = self.dispatcher.clone();
        let address = self.address.clone();
        let name = name.to_string();
        move |payload| dispatcher(&address, &name, payload)
    }
}

// =============================================================================
// Merge
// =============================================================================

/// Position of the current node inside the nearest ancestor component's
/// child-signals proxy.
#[derive(Clone, Copy)]
struct Slot<'a> {
    proxy: &'a IndexMap<String, Rc<ChildSignal>>,
    key: &'a Key,
}

/// Reconcile the signal tree under one diff subtree.
///
/// `model` is the model node at `address` (the subtree root the diff was
/// sliced at), `prev` the existing signal subtree there. Unchanged
/// branches are returned by identity; only changed addresses are touched.
///
/// A sliced subtree rooted at a grouping or collection has no enclosing
/// component by construction: an enclosing component with changes below it
/// would itself have classified as a change and pulled the minimal address
/// up to its own position. So no proxy context is lost by starting there.
pub fn merge_signals(
    model: &Model,
    address: &Address,
    diff: &Diff,
    prev: &SignalTree,
    dispatcher: &Dispatcher,
) -> Result<SignalTree> {
    match model {
        Model::Component(_) => merge(model, diff, prev, address, None, dispatcher),
        _ => merge_children(model, diff, prev, address, None, dispatcher),
    }
}

fn merge(
    model: &Model,
    diff: &Diff,
    prev: &SignalTree,
    address: &Address,
    slot: Option<Slot<'_>>,
    dispatcher: &Dispatcher,
) -> Result<SignalTree> {
    match (model, diff) {
        (Model::Component(c), Diff::Node { tag, children }) => match tag {
            DiffTag::Unchanged => Ok(prev.clone()),

            DiffTag::Create => {
                trace!(target: "trellis::signal", component = c.name(), %address, "signal create");
                let signals: IndexMap<String, Rc<Signal>> = c
                    .signal_names()
                    .iter()
                    .map(|name| (name.clone(), Signal::new(name)))
                    .collect();
                let child_signals = ChildSignals::from_model(c.nested());
                let node = Rc::new(SignalNode {
                    signals,
                    child_signals,
                });

                // Link each channel into the parent's proxy so collection
                // broadcasts and each-listeners reach this member.
                if let Some(slot) = slot {
                    for (name, signal) in &node.signals {
                        if let Some(proxy) = slot.proxy.get(name) {
                            proxy.register(slot.key.clone(), signal.clone());
                            *signal.uplink.borrow_mut() = Some(Uplink {
                                proxy: proxy.clone(),
                                key: slot.key.clone(),
                            });
                        }
                    }
                }

                if let Some(setup) = c.signal_setup() {
                    // The one window where listener registration is legal
                    // mid-transition.
                    unlock_registration();
                    setup(&SignalSetup {
                        address: address.clone(),
                        signals: node.clone(),
                        dispatcher: dispatcher.clone(),
                    });
                    lock_registration();
                }

                let children = match (c.nested(), children) {
                    (Some(nested), Some(child_diff)) => merge_children(
                        nested,
                        child_diff,
                        &SignalTree::Absent,
                        address,
                        Some(node.child_signals()),
                        dispatcher,
                    )?,
                    _ => SignalTree::Absent,
                };
                Ok(SignalTree::Node {
                    node,
                    children: Box::new(children),
                })
            }

            DiffTag::Update => {
                let SignalTree::Node {
                    node,
                    children: prev_children,
                } = prev
                else {
                    return Err(Error::SignalUsage {
                        signal: c.name().to_string(),
                        detail: format!("update at `{address}` with no live signal node"),
                    });
                };
                // Same node object: every listener and its order survives.
                let children = match (c.nested(), children) {
                    (Some(nested), Some(child_diff)) => merge_children(
                        nested,
                        child_diff,
                        prev_children,
                        address,
                        Some(node.child_signals()),
                        dispatcher,
                    )?,
                    _ => (**prev_children).clone(),
                };
                Ok(SignalTree::Node {
                    node: node.clone(),
                    children: Box::new(children),
                })
            }

            DiffTag::Destroy => {
                trace!(target: "trellis::signal", component = c.name(), %address, "signal destroy");
                if let Some(slot) = slot {
                    for proxy in slot.proxy.values() {
                        proxy.unregister(slot.key);
                    }
                }
                Ok(SignalTree::Absent)
            }
        },

        // Inside a component's nested model the walk is driven by
        // merge_children; reaching a non-component model here with a
        // non-node diff means the two trees disagree.
        _ => Err(Error::SignalUsage {
            signal: "merge".to_string(),
            detail: format!("diff shape does not match model at `{address}`"),
        }),
    }
}

/// Walk a component's nested model, threading the owning component's proxy
/// (when there is one) so member channels can be linked and unlinked.
fn merge_children(
    model: &Model,
    diff: &Diff,
    prev: &SignalTree,
    address: &Address,
    proxy: Option<&ChildSignals>,
    dispatcher: &Dispatcher,
) -> Result<SignalTree> {
    match (model, diff) {
        (Model::Component(_), Diff::Node { .. }) => {
            // Reached only for sliced subtrees rooted directly at a single
            // component; the grouping branches below attach the field key.
            merge(model, diff, prev, address, None, dispatcher)
        }

        (Model::ObjectOf(c), Diff::ObjectOf(members)) => {
            let member_model = Model::Component(c.clone());
            let proxy_map = proxy.and_then(proxy_child_map);
            let mut out = IndexMap::new();
            for (name, member_diff) in members {
                let key = Key::Field(name.clone());
                let member_prev = match prev {
                    SignalTree::ObjectOf(map) => map.get(name).cloned().unwrap_or_default(),
                    _ => SignalTree::Absent,
                };
                let member_address = address.clone().field(name.clone());
                let merged = merge(
                    &member_model,
                    member_diff,
                    &member_prev,
                    &member_address,
                    proxy_map.map(|proxy| Slot { proxy, key: &key }),
                    dispatcher,
                )?;
                if !matches!(merged, SignalTree::Absent) {
                    out.insert(name.clone(), merged);
                }
            }
            // Live members a sliced diff did not mention keep their entries.
            if let SignalTree::ObjectOf(prev_map) = prev {
                for (name, entry) in prev_map {
                    if !members.contains_key(name) {
                        out.insert(name.clone(), entry.clone());
                    }
                }
            }
            Ok(SignalTree::ObjectOf(out))
        }

        (Model::ArrayOf(c), Diff::ArrayOf(members)) => {
            let member_model = Model::Component(c.clone());
            let proxy_map = proxy.and_then(proxy_child_map);
            let mut out = BTreeMap::new();
            for (i, member_diff) in members {
                let key = Key::Index(*i);
                let member_prev = match prev {
                    SignalTree::ArrayOf(map) => map.get(i).cloned().unwrap_or_default(),
                    _ => SignalTree::Absent,
                };
                let member_address = address.clone().index(*i);
                let merged = merge(
                    &member_model,
                    member_diff,
                    &member_prev,
                    &member_address,
                    proxy_map.map(|proxy| Slot { proxy, key: &key }),
                    dispatcher,
                )?;
                if !matches!(merged, SignalTree::Absent) {
                    out.insert(*i, merged);
                }
            }
            if let SignalTree::ArrayOf(prev_map) = prev {
                for (i, entry) in prev_map {
                    if !members.contains_key(i) {
                        out.insert(*i, entry.clone());
                    }
                }
            }
            Ok(SignalTree::ArrayOf(out))
        }

        (Model::Object(fields), Diff::Object(field_diffs)) => {
            let mut out = IndexMap::new();
            for (name, nested) in fields {
                let field_prev = match prev {
                    SignalTree::Object(map) => map.get(name).cloned().unwrap_or_default(),
                    _ => SignalTree::Absent,
                };
                let Some(field_diff) = field_diffs.get(name) else {
                    out.insert(name.clone(), field_prev);
                    continue;
                };
                let field_proxy = proxy.and_then(|p| p.child(name));
                let field_address = address.clone().field(name.clone());
                let key = Key::Field(name.clone());
                let merged = match (nested, field_proxy) {
                    // A single component under a grouping field is keyed by
                    // that field in the proxy.
                    (Model::Component(_), Some(ChildSignals::Child(map))) => merge(
                        nested,
                        field_diff,
                        &field_prev,
                        &field_address,
                        Some(Slot {
                            proxy: map,
                            key: &key,
                        }),
                        dispatcher,
                    )?,
                    _ => merge_children(
                        nested,
                        field_diff,
                        &field_prev,
                        &field_address,
                        field_proxy,
                        dispatcher,
                    )?,
                };
                out.insert(name.clone(), merged);
            }
            Ok(SignalTree::Object(out))
        }

        (Model::Array(slots), Diff::Array(slot_diffs)) => {
            let mut out = Vec::with_capacity(slots.len());
            for (i, nested) in slots.iter().enumerate() {
                let slot_prev = match prev {
                    SignalTree::Array(items) => items.get(i).cloned().unwrap_or_default(),
                    _ => SignalTree::Absent,
                };
                let Some(slot_diff) = slot_diffs.get(i) else {
                    out.push(slot_prev);
                    continue;
                };
                let slot_proxy = proxy.and_then(|p| p.slot(i));
                let slot_address = address.clone().index(i);
                let key = Key::Index(i);
                let merged = match (nested, slot_proxy) {
                    (Model::Component(_), Some(ChildSignals::Child(map))) => merge(
                        nested,
                        slot_diff,
                        &slot_prev,
                        &slot_address,
                        Some(Slot {
                            proxy: map,
                            key: &key,
                        }),
                        dispatcher,
                    )?,
                    _ => merge_children(
                        nested,
                        slot_diff,
                        &slot_prev,
                        &slot_address,
                        slot_proxy,
                        dispatcher,
                    )?,
                };
                out.push(merged);
            }
            Ok(SignalTree::Array(out))
        }

        _ => Err(Error::SignalUsage {
            signal: "merge".to_string(),
            detail: format!("diff shape does not match model at `{address}`"),
        }),
    }
}

fn proxy_child_map(proxy: &ChildSignals) -> Option<&IndexMap<String, Rc<ChildSignal>>> {
    match proxy {
        ChildSignals::Child(map) => Some(map),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
