//! Model description - the declarative component nesting schema.
//!
//! A [`Model`] node is one of:
//! - [`Model::Component`] - a component leaf
//! - [`Model::ObjectOf`] / [`Model::ArrayOf`] - a keyed/indexed collection
//!   of instances of one component
//! - [`Model::Object`] / [`Model::Array`] - plain structural grouping with
//!   no component of its own
//!
//! Models are built once by the application author and are immutable for
//! the lifetime of a run. The closed enum makes the illegal
//! "object-and-array double wrapped" shape unrepresentable; the remaining
//! definition-time invariants are checked in [`Component::new`].

mod component;
mod validate;

pub use component::{
    Component, ComponentDef, InitFn, LifecycleHook, Method, Reducer, RenderHook,
    ShouldUpdateHook, SignalSetupFn,
};
pub use validate::validate_shape;

use std::rc::Rc;

use indexmap::IndexMap;

use crate::address::{Address, Key};

/// One node of the component nesting schema.
#[derive(Clone, Debug)]
pub enum Model {
    /// A single component instance.
    Component(Rc<Component>),
    /// A string-keyed collection of instances of one component.
    ObjectOf(Rc<Component>),
    /// An index-keyed collection of instances of one component.
    ArrayOf(Rc<Component>),
    /// Structural grouping by field name.
    Object(IndexMap<String, Model>),
    /// Structural grouping by position.
    Array(Vec<Model>),
}

/// Wrap a component as a single-instance model node.
pub fn component(c: Component) -> Model {
    Model::Component(Rc::new(c))
}

/// Wrap a component as a string-keyed collection.
pub fn object_of(c: Component) -> Model {
    Model::ObjectOf(Rc::new(c))
}

/// Wrap a component as an index-keyed collection.
pub fn array_of(c: Component) -> Model {
    Model::ArrayOf(Rc::new(c))
}

impl Model {
    /// Resolve the model node at `address`.
    ///
    /// Collection member steps resolve to the member component; descent
    /// past a component continues into its nested model. Returns `None`
    /// when the address does not name a model position.
    pub fn at(&self, address: &Address) -> Option<Model> {
        self.at_keys(address.keys())
    }

    fn at_keys(&self, keys: &[Key]) -> Option<Model> {
        let Some((key, rest)) = keys.split_first() else {
            return Some(self.clone());
        };
        match (self, key) {
            (Model::Component(c), _) => c.nested()?.at_keys(keys),
            (Model::ObjectOf(c), Key::Field(_)) | (Model::ArrayOf(c), Key::Index(_)) => {
                Model::Component(c.clone()).at_keys(rest)
            }
            (Model::Object(map), Key::Field(name)) => map.get(name)?.at_keys(rest),
            (Model::Array(items), Key::Index(i)) => items.get(*i)?.at_keys(rest),
            _ => None,
        }
    }

    /// True when some component in this subtree has a render hook, i.e.
    /// a binding must be provided for the subtree to render into.
    pub(crate) fn needs_binding(&self) -> bool {
        match self {
            Model::Component(c) | Model::ObjectOf(c) | Model::ArrayOf(c) => {
                c.has_render() || c.nested().is_some_and(Model::needs_binding)
            }
            Model::Object(map) => map.values().any(Model::needs_binding),
            Model::Array(items) => items.iter().any(Model::needs_binding),
        }
    }

    /// Shape name for error messages.
    pub(crate) fn shape_name(&self) -> &'static str {
        match self {
            Model::Component(_) => "component",
            Model::ObjectOf(_) => "objectOf",
            Model::ArrayOf(_) => "arrayOf",
            Model::Object(_) => "object",
            Model::Array(_) => "array",
        }
    }
}
