//! # trellis
//!
//! State-tree UI reconciliation core.
//!
//! An application is described once as a [`Model`]: a nesting schema of
//! [`Component`] definitions, grouped by objects/arrays and multiplied by
//! keyed or indexed collections. The whole application state is a single
//! JSON-like [`Value`] tree shaped like the model; a component instance
//! exists exactly where its state node is present and non-null.
//!
//! Every state change is one transition:
//! ```text
//! reducer → persistent state write → diff (reference equality)
//!         → signal-graph merge → lifecycle/render walk → commit
//! ```
//! The diff tags each component position CREATE / UPDATE / DESTROY /
//! unchanged and names the *minimal address* - the deepest subtree
//! containing every change. Work outside it never happens: untouched
//! members keep their bindings, their signal listeners, and their state
//! nodes by identity.
//!
//! ## Modules
//!
//! - [`value`] - shared immutable state values, reference-equality aware
//! - [`address`] - paths into the shared model/state/signal address space,
//!   plus the persistent state setter
//! - [`model`] - component definitions and the nesting schema
//! - [`diff`] - transition classification and minimal-subtree computation
//! - [`signal`] - per-instance named channels and the child-signals proxy
//! - [`render`] - lifecycle walker and the opaque binding tree
//! - [`run`] - the run loop: transition queue, dispatch, the [`RunHandle`]

pub mod address;
pub mod diff;
pub mod error;
pub mod model;
pub mod render;
pub mod run;
pub mod signal;
pub mod value;

pub use address::{get, set, set_mut, Address, Key};
pub use diff::{diff, diff_full, Diff, DiffResult, DiffTag, MinSubtree};
pub use error::{Error, Result};
pub use model::{
    array_of, component, object_of, validate_shape, Component, ComponentDef, InitFn,
    LifecycleHook, Method, Model, Reducer, RenderHook, ShouldUpdateHook, SignalSetupFn,
};
pub use render::{Binding, BindingTree, HookInput};
pub use run::{run, run_headless, MethodInput, RunHandle, RunOptions};
pub use signal::{ChildSignal, ChildSignals, Signal, SignalNode, SignalSetup, SignalTree};
pub use value::{ObjectMap, Value, ValueKind};
