//! Component descriptors - the leaf building block of a model.
//!
//! Components are defined with a [`ComponentDef`] (plain struct, all fields
//! optional) and validated eagerly by [`Component::new`], before any run:
//! definition faults surface at construction, not mid-transition.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::model::Model;
use crate::render::{BindingTree, HookInput};
use crate::run::MethodInput;
use crate::signal::SignalSetup;
use crate::value::Value;

/// Produces a fresh instance's initial local state.
pub type InitFn = Rc<dyn Fn() -> Value>;
/// `render` hook: draws the instance, returns bindings for its children.
pub type RenderHook = Rc<dyn Fn(&HookInput) -> BindingTree>;
/// Side-effect-only lifecycle hook (will/did mount, will/did update, will unmount).
pub type LifecycleHook = Rc<dyn Fn(&HookInput)>;
/// Update gate: `(new_state, old_state) -> bool`. Default: always update.
pub type ShouldUpdateHook = Rc<dyn Fn(&Value, &Value) -> bool>;
/// Pure local-state transition: `(local_state, payload) -> local_state`.
pub type Reducer = Rc<dyn Fn(&Value, &Value) -> Value>;
/// Imperative shortcut exposed on the run handle.
pub type Method = Rc<dyn Fn(&MethodInput)>;
/// One-time wiring of signal listeners, run on instance creation.
pub type SignalSetupFn = Rc<dyn Fn(&SignalSetup)>;

/// Author-facing component definition. Every field is optional; the empty
/// definition is a stateless component with no hooks and no signals.
#[derive(Default)]
pub struct ComponentDef {
    pub name: Option<String>,
    /// Nested child shape. Must be a grouping or collection node, never a
    /// bare `Model::Component` - wrap single children in an object.
    pub model: Option<Model>,
    pub init: Option<InitFn>,
    /// Names of this component's own signal channels.
    pub signal_names: Vec<String>,
    pub signal_setup: Option<SignalSetupFn>,
    pub reducers: IndexMap<String, Reducer>,
    pub methods: IndexMap<String, Method>,
    pub render: Option<RenderHook>,
    pub will_mount: Option<LifecycleHook>,
    pub did_mount: Option<LifecycleHook>,
    pub should_update: Option<ShouldUpdateHook>,
    pub will_update: Option<LifecycleHook>,
    pub did_update: Option<LifecycleHook>,
    pub will_unmount: Option<LifecycleHook>,
}

/// A validated component. Immutable after construction; shared by `Rc`
/// wherever the model references it.
pub struct Component {
    name: String,
    model: Option<Model>,
    init: Option<InitFn>,
    signal_names: Vec<String>,
    signal_setup: Option<SignalSetupFn>,
    reducers: IndexMap<String, Reducer>,
    methods: IndexMap<String, Method>,
    pub(crate) render: Option<RenderHook>,
    pub(crate) will_mount: Option<LifecycleHook>,
    pub(crate) did_mount: Option<LifecycleHook>,
    pub(crate) should_update: Option<ShouldUpdateHook>,
    pub(crate) will_update: Option<LifecycleHook>,
    pub(crate) did_update: Option<LifecycleHook>,
    pub(crate) will_unmount: Option<LifecycleHook>,
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Component {
    /// Validate a definition. Fails with [`Error::ComponentDefinition`] on:
    /// - a nested model that is a bare component reference
    /// - duplicate signal names
    /// - a name collision between signals and reducers (signal listeners
    ///   are wired to reducer callers by name in `signal_setup`)
    /// - a method name colliding with a signal or reducer
    pub fn new(def: ComponentDef) -> Result<Self> {
        let name = def.name.unwrap_or_else(|| "component".to_string());

        if let Some(Model::Component(_)) = &def.model {
            return Err(Error::ComponentDefinition {
                component: name,
                detail: "nested model is a bare component; wrap it in a grouping or collection"
                    .to_string(),
            });
        }

        for (i, signal) in def.signal_names.iter().enumerate() {
            if def.signal_names[..i].contains(signal) {
                return Err(Error::ComponentDefinition {
                    component: name,
                    detail: format!("duplicate signal name `{signal}`"),
                });
            }
            if def.reducers.contains_key(signal) {
                return Err(Error::ComponentDefinition {
                    component: name,
                    detail: format!("signal `{signal}` collides with a reducer of the same name"),
                });
            }
        }

        for method in def.methods.keys() {
            if def.signal_names.contains(method) || def.reducers.contains_key(method) {
                return Err(Error::ComponentDefinition {
                    component: name,
                    detail: format!("method `{method}` collides with a signal or reducer"),
                });
            }
        }

        Ok(Component {
            name,
            model: def.model,
            init: def.init,
            signal_names: def.signal_names,
            signal_setup: def.signal_setup,
            reducers: def.reducers,
            methods: def.methods,
            render: def.render,
            will_mount: def.will_mount,
            did_mount: def.did_mount,
            should_update: def.should_update,
            will_update: def.will_update,
            did_update: def.did_update,
            will_unmount: def.will_unmount,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The nested child model, if this component has children.
    pub fn nested(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    pub fn signal_names(&self) -> &[String] {
        &self.signal_names
    }

    pub(crate) fn signal_setup(&self) -> Option<&SignalSetupFn> {
        self.signal_setup.as_ref()
    }

    pub(crate) fn reducer(&self, name: &str) -> Option<&Reducer> {
        self.reducers.get(name)
    }

    pub(crate) fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub(crate) fn has_render(&self) -> bool {
        self.render.is_some()
    }

    /// Initial local state for a fresh instance. Defaults to `{}`.
    pub fn initial_state(&self) -> Value {
        match &self.init {
            Some(init) => init(),
            None => Value::object(Default::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_signal_name_rejected() {
        let err = Component::new(ComponentDef {
            name: Some("dup".into()),
            signal_names: vec!["ping".into(), "ping".into()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("duplicate signal name"));
    }

    #[test]
    fn test_signal_reducer_collision_rejected() {
        let bump: Reducer = Rc::new(|state, _| state.clone());
        let err = Component::new(ComponentDef {
            name: Some("clash".into()),
            signal_names: vec!["bump".into()],
            reducers: IndexMap::from([("bump".to_string(), bump)]),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::ComponentDefinition { .. }));
    }

    #[test]
    fn test_custom_init() {
        let c = Component::new(ComponentDef {
            init: Some(Rc::new(|| serde_json::json!({"count": 0}).into())),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(c.initial_state().get("count").and_then(Value::as_int), Some(0));
        assert_eq!(c.name(), "component");
    }
}
