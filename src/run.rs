//! Run loop - owns the live trees and serializes transitions.
//!
//! [`run`] mounts a root component and returns a [`RunHandle`]. Every
//! state change funnels through one queue: a dispatch that arrives while
//! a transition is in flight (from a signal listener, a lifecycle hook,
//! or a method) is deferred and applied after the current one commits, in
//! arrival order. Hooks therefore always observe a fully committed
//! previous snapshot.
//!
//! Per transition: reduce the local state, write it through the
//! persistent setter, diff the whole tree, then confine all work to the
//! minimal changed subtree - merge signals there first (so freshly
//! mounted instances have their channels before hooks run), walk the
//! render lifecycle, and splice both subtrees back.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use tracing::{debug, info};

use crate::address::{self, Address};
use crate::diff::diff_full;
use crate::error::{Error, Result};
use crate::model::{validate_shape, Component, Model};
use crate::render::{update_tree, Binding, BindingTree};
use crate::signal::{
    lock_registration, merge_signals, unlock_registration, Dispatcher, Signal, SignalNode,
    SignalTree,
};
use crate::value::Value;

/// What a component method receives when invoked through the handle.
pub struct MethodInput {
    pub address: Address,
    /// The instance's committed local state at call time.
    pub state: Value,
    pub payload: Value,
    pub signals: Option<Rc<SignalNode>>,
    dispatcher: Dispatcher,
}

impl MethodInput {
    /// Dispatch one of the instance's own reducers. Queued behind the
    /// current transition if one is in flight.
    pub fn dispatch(&self, reducer: &str, payload: Value) {
        (self.dispatcher)(&self.address, reducer, payload);
    }
}

/// Options for [`run`].
#[derive(Default)]
pub struct RunOptions {
    /// Overrides the root component's `init` state.
    pub initial_state: Option<Value>,
    /// Log every transition at info level instead of debug.
    pub verbose: bool,
}

enum Pending {
    Dispatch {
        address: Address,
        reducer: String,
        payload: Value,
    },
    Replace {
        state: Value,
    },
}

struct Session {
    model: Model,
    mount: Option<Binding>,
    verbose: bool,
    state: RefCell<Option<Value>>,
    bindings: RefCell<BindingTree>,
    signals: RefCell<SignalTree>,
    in_flight: Cell<bool>,
    queue: RefCell<VecDeque<Pending>>,
}

/// Live instance of a mounted root component. Single-threaded, clonable;
/// clones share the session.
#[derive(Clone)]
pub struct RunHandle {
    session: Rc<Session>,
}

/// Mount `root` and run the initial transition. `mount_target` is the
/// binding the root component renders into, if it renders at all.
pub fn run(root: Component, mount_target: Option<Binding>, options: RunOptions) -> Result<RunHandle> {
    let root = Rc::new(root);
    let initial = match options.initial_state {
        Some(state) => state,
        None => root.initial_state(),
    };
    let model = Model::Component(root);
    validate_shape(&model, &initial)?;

    let session = Rc::new(Session {
        model,
        mount: mount_target,
        verbose: options.verbose,
        state: RefCell::new(None),
        bindings: RefCell::new(BindingTree::Absent),
        signals: RefCell::new(SignalTree::Absent),
        in_flight: Cell::new(false),
        queue: RefCell::new(VecDeque::new()),
    });

    session.enqueue(Pending::Replace { state: initial });
    session.drain()?;
    Ok(RunHandle { session })
}

/// Convenience for [`run`] with defaults and no mount binding.
pub fn run_headless(root: Component) -> Result<RunHandle> {
    run(root, None, RunOptions::default())
}

impl RunHandle {
    /// The committed root state.
    pub fn state(&self) -> Value {
        self.session
            .state
            .borrow()
            .clone()
            .unwrap_or_else(Value::null)
    }

    /// The committed local state at `address`; null when no instance
    /// exists there.
    pub fn state_at(&self, address: &Address) -> Value {
        let root = self.session.state.borrow();
        root.as_ref()
            .and_then(|root| address::get(root, address))
            .cloned()
            .unwrap_or_else(Value::null)
    }

    /// The signal surface of the live instance at `address`.
    pub fn signals_at(&self, address: &Address) -> Option<Rc<SignalNode>> {
        self.session.signals.borrow().node_at(address).cloned()
    }

    /// The root component's signal surface.
    pub fn signals(&self) -> Option<Rc<SignalNode>> {
        self.signals_at(&Address::root())
    }

    /// One of the root component's own channels, by name.
    pub fn signal(&self, name: &str) -> Option<Rc<Signal>> {
        self.signals()?.signal(name).cloned()
    }

    /// The binding held by the component at `address`.
    pub fn binding_at(&self, address: &Address) -> Option<Binding> {
        self.session.bindings.borrow().el_at(address).cloned()
    }

    /// Dispatch a reducer of the instance at `address`. Runs now, or is
    /// queued behind the transition in flight.
    pub fn dispatch(&self, address: &Address, reducer: &str, payload: Value) -> Result<()> {
        self.session.enqueue(Pending::Dispatch {
            address: address.clone(),
            reducer: reducer.to_string(),
            payload,
        });
        self.session.drain()
    }

    /// Dispatch a reducer of the root component.
    pub fn dispatch_root(&self, reducer: &str, payload: Value) -> Result<()> {
        self.dispatch(&Address::root(), reducer, payload)
    }

    /// Invoke a method of the instance at `address`. Methods run
    /// immediately; any reducers they dispatch are queued as usual.
    pub fn call_at(&self, address: &Address, method: &str, payload: Value) -> Result<()> {
        let component = self.session.component_at(address)?;
        let hook = component
            .method(method)
            .ok_or_else(|| Error::SignalUsage {
                signal: method.to_string(),
                detail: format!("no method of component `{}`", component.name()),
            })?
            .clone();
        hook(&MethodInput {
            address: address.clone(),
            state: self.state_at(address),
            payload,
            signals: self.signals_at(address),
            dispatcher: self.session.dispatcher(),
        });
        // Run anything the method queued.
        self.session.drain()
    }

    /// Invoke a method of the root component.
    pub fn call(&self, method: &str, payload: Value) -> Result<()> {
        self.call_at(&Address::root(), method, payload)
    }

    /// Replace the whole state tree in one transition. The diff decides
    /// what actually mounts, updates, or unmounts; instances whose nodes
    /// are carried over by reference stay untouched.
    pub fn set_state(&self, state: Value) -> Result<()> {
        validate_shape(&self.session.model, &state)?;
        self.session.enqueue(Pending::Replace { state });
        self.session.drain()
    }
}

impl Session {
    fn dispatcher(self: &Rc<Self>) -> Dispatcher {
        let weak: Weak<Session> = Rc::downgrade(self);
        Rc::new(move |address, reducer, payload| {
            if let Some(session) = weak.upgrade() {
                session.enqueue(Pending::Dispatch {
                    address: address.clone(),
                    reducer: reducer.to_string(),
                    payload,
                });
                // Inside a transition this is a no-op; the draining loop
                // picks the entry up. Errors surface from that drain.
                if !session.in_flight.get() {
                    if let Err(err) = session.drain() {
                        tracing::error!(target: "trellis::run", %err, "deferred dispatch failed");
                    }
                }
            }
        })
    }

    fn enqueue(&self, pending: Pending) {
        self.queue.borrow_mut().push_back(pending);
    }

    fn drain(self: &Rc<Self>) -> Result<()> {
        if self.in_flight.get() {
            return Ok(());
        }
        self.in_flight.set(true);
        lock_registration();
        let result = self.drain_inner();
        unlock_registration();
        self.in_flight.set(false);
        result
    }

    fn drain_inner(self: &Rc<Self>) -> Result<()> {
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(pending) = next else {
                return Ok(());
            };
            let new_root = match pending {
                Pending::Replace { state } => state,
                Pending::Dispatch {
                    address,
                    reducer,
                    payload,
                } => {
                    let component = self.component_at(&address)?;
                    let hook = component.reducer(&reducer).ok_or_else(|| Error::SignalUsage {
                        signal: reducer.clone(),
                        detail: format!("no reducer of component `{}`", component.name()),
                    })?;
                    let state = self.state.borrow();
                    let local = state
                        .as_ref()
                        .and_then(|root| address::get(root, &address))
                        .cloned()
                        .unwrap_or_else(Value::null);
                    let next_local = hook(&local, &payload);
                    match state.as_ref() {
                        Some(root) if !address.is_root() => {
                            address::set(root, &address, next_local)?
                        }
                        _ => next_local,
                    }
                }
            };
            self.transition(new_root)?;
        }
    }

    /// One committed transition: diff, merge signals, walk the render
    /// lifecycle, splice, commit.
    fn transition(self: &Rc<Self>, new_root: Value) -> Result<()> {
        let old_root = self.state.borrow().clone();
        let result = diff_full(&self.model, &new_root, old_root.as_ref())?;

        let Some(min) = result.min_update else {
            // Nothing changed by identity; still commit the snapshot.
            *self.state.borrow_mut() = Some(new_root);
            return Ok(());
        };

        if self.verbose {
            info!(target: "trellis::run", subtree = %min.address, "transition");
        } else {
            debug!(target: "trellis::run", subtree = %min.address, "transition");
        }

        let sub_diff = result
            .tree
            .at(&min.address)
            .ok_or_else(|| Error::address(min.address.clone(), "no diff subtree"))?;
        let new_sub = address::get(&new_root, &min.address);
        let old_sub = old_root
            .as_ref()
            .and_then(|root| address::get(root, &min.address));

        // Signals first: hooks of freshly created instances must find
        // their channels wired.
        let merged = {
            let signals = self.signals.borrow();
            let absent = SignalTree::Absent;
            let prev_sub = signals
                .subtree_at(min.address.keys())
                .unwrap_or(&absent);
            merge_signals(&min.model, &min.address, sub_diff, prev_sub, &self.dispatcher())?
        };

        let walked = {
            let bindings = self.bindings.borrow();
            let absent = BindingTree::Absent;
            let prev_sub = bindings
                .subtree_at(min.address.keys())
                .unwrap_or(&absent);
            let parent_el = if min.address.is_root() {
                self.mount.clone()
            } else {
                None
            };
            update_tree(
                &min.model,
                sub_diff,
                new_sub,
                old_sub,
                prev_sub,
                parent_el,
                &min.address,
                &merged,
            )?
        };

        self.signals.borrow_mut().splice(&min.address, merged);
        self.bindings.borrow_mut().splice(&min.address, walked);
        *self.state.borrow_mut() = Some(new_root);
        Ok(())
    }

    fn component_at(&self, address: &Address) -> Result<Rc<Component>> {
        match self.model.at(address) {
            Some(Model::Component(c)) => Ok(c),
            Some(other) => Err(Error::shape(address.clone(), "component", other.shape_name())),
            None => Err(Error::address(address.clone(), "no component")),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::model::{array_of, ComponentDef};
    use crate::render::HookInput;
    use crate::signal::SignalSetup;

    fn counter() -> Component {
        Component::new(ComponentDef {
            name: Some("counter".into()),
            init: Some(Rc::new(|| serde_json::json!({"count": 0}).into())),
            reducers: IndexMap::from([(
                "add".to_string(),
                Rc::new(|state: &Value, payload: &Value| {
                    let count = state.get("count").and_then(Value::as_int).unwrap_or(0);
                    let by = payload.get("by").and_then(Value::as_int).unwrap_or(1);
                    Value::from_pairs([("count", Value::from(count + by))])
                }) as crate::model::Reducer,
            )]),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_mount_and_dispatch() {
        let handle = run_headless(counter()).unwrap();
        assert_eq!(handle.state().get("count").and_then(Value::as_int), Some(0));

        handle
            .dispatch_root("add", serde_json::json!({"by": 2}).into())
            .unwrap();
        handle.dispatch_root("add", Value::object(Default::default())).unwrap();
        assert_eq!(handle.state().get("count").and_then(Value::as_int), Some(3));
    }

    #[test]
    fn test_unknown_reducer_faults() {
        let handle = run_headless(counter()).unwrap();
        let err = handle
            .dispatch_root("subtract", Value::object(Default::default()))
            .unwrap_err();
        assert!(matches!(err, Error::SignalUsage { .. }));
    }

    #[test]
    fn test_dispatch_to_collection_member() {
        let root = Component::new(ComponentDef {
            name: Some("board".into()),
            init: Some(Rc::new(|| {
                serde_json::json!({"cells": [{"count": 0}, {"count": 10}]}).into()
            })),
            model: Some(Model::Object(IndexMap::from([(
                "cells".to_string(),
                array_of(counter()),
            )]))),
            ..Default::default()
        })
        .unwrap();

        let handle = run_headless(root).unwrap();
        let cell = Address::root().field("cells").index(1);
        handle
            .dispatch(&cell, "add", serde_json::json!({"by": 5}).into())
            .unwrap();

        assert_eq!(
            handle.state_at(&cell).get("count").and_then(Value::as_int),
            Some(15)
        );
        // The sibling's node is carried over by reference.
        assert_eq!(
            handle
                .state_at(&Address::root().field("cells").index(0))
                .get("count")
                .and_then(Value::as_int),
            Some(0)
        );
    }

    #[test]
    fn test_method_runs_and_its_dispatch_commits() {
        let mut def = ComponentDef {
            name: Some("counter".into()),
            init: Some(Rc::new(|| serde_json::json!({"count": 0}).into())),
            ..Default::default()
        };
        def.reducers.insert(
            "add".to_string(),
            Rc::new(|state: &Value, _: &Value| {
                let count = state.get("count").and_then(Value::as_int).unwrap_or(0);
                Value::from_pairs([("count", Value::from(count + 1))])
            }),
        );
        def.methods.insert(
            "bump_twice".to_string(),
            Rc::new(|input: &MethodInput| {
                input.dispatch("add", Value::object(Default::default()));
                input.dispatch("add", Value::object(Default::default()));
            }),
        );
        let handle = run_headless(Component::new(def).unwrap()).unwrap();

        handle.call("bump_twice", Value::null()).unwrap();
        assert_eq!(handle.state().get("count").and_then(Value::as_int), Some(2));
    }

    #[test]
    fn test_signal_listener_dispatch_is_serialized() {
        // A listener fired mid-transition dispatches a reducer; the
        // dispatch must land after the current transition commits.
        let root = Component::new(ComponentDef {
            name: Some("relay".into()),
            init: Some(Rc::new(|| serde_json::json!({"count": 0, "echoes": 0}).into())),
            signal_names: vec!["ping".into()],
            signal_setup: Some(Rc::new(|setup: &SignalSetup| {
                let echo = setup.reducer_caller("echo");
                setup
                    .signal("ping")
                    .unwrap()
                    .on(move |payload: &Value| echo(payload.clone()))
                    .unwrap();
            })),
            reducers: IndexMap::from([
                (
                    "add".to_string(),
                    Rc::new(|state: &Value, _: &Value| {
                        let n = state.get("count").and_then(Value::as_int).unwrap_or(0);
                        let echoes = state.get("echoes").cloned().unwrap_or_else(Value::null);
                        Value::from_pairs([
                            ("count", Value::from(n + 1)),
                            ("echoes", echoes),
                        ])
                    }) as crate::model::Reducer,
                ),
                (
                    "echo".to_string(),
                    Rc::new(|state: &Value, _: &Value| {
                        let n = state.get("count").cloned().unwrap_or_else(Value::null);
                        let echoes = state.get("echoes").and_then(Value::as_int).unwrap_or(0);
                        Value::from_pairs([("count", n), ("echoes", Value::from(echoes + 1))])
                    }) as crate::model::Reducer,
                ),
            ]),
            did_update: Some(Rc::new(|input: &HookInput| {
                // Fire the signal during the transition; the echo reducer
                // it triggers must not re-enter.
                if input.state.get("echoes").and_then(Value::as_int) == Some(0) {
                    if let Some(signals) = &input.signals {
                        if let Some(ping) = signals.signal("ping") {
                            ping.call(&Value::object(Default::default())).unwrap();
                        }
                    }
                }
            })),
            ..Default::default()
        })
        .unwrap();

        let handle = run_headless(root).unwrap();
        handle.dispatch_root("add", Value::object(Default::default())).unwrap();

        let state = handle.state();
        assert_eq!(state.get("count").and_then(Value::as_int), Some(1));
        assert_eq!(state.get("echoes").and_then(Value::as_int), Some(1));
    }

    #[test]
    fn test_set_state_hot_swap() {
        let root = Component::new(ComponentDef {
            name: Some("board".into()),
            init: Some(Rc::new(|| serde_json::json!({"cells": [{"count": 1}]}).into())),
            model: Some(Model::Object(IndexMap::from([(
                "cells".to_string(),
                array_of(counter()),
            )]))),
            ..Default::default()
        })
        .unwrap();
        let handle = run_headless(root).unwrap();

        handle
            .set_state(serde_json::json!({"cells": [{"count": 1}, {"count": 2}]}).into())
            .unwrap();
        assert_eq!(
            handle
                .state_at(&Address::root().field("cells").index(1))
                .get("count")
                .and_then(Value::as_int),
            Some(2)
        );

        // Shape faults are rejected before any transition runs.
        let err = handle
            .set_state(serde_json::json!({"cells": {"a": {}}}).into())
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert_eq!(
            handle.state().get("cells").and_then(Value::as_array).map(Vec::len),
            Some(2)
        );
    }
}
