//! Error taxonomy.
//!
//! Every failure class here is a programmer error: a model/state/binding
//! shape disagreement, a bad address, a misused signal, or an invalid
//! component definition. They are detected eagerly, surfaced synchronously
//! to whoever triggered the operation, and never retried; the core does no
//! I/O, so there are no transient failures.

use thiserror::Error;

use crate::address::Address;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// State or bindings do not conform to the model shape.
    #[error("shape mismatch at `{address}`: expected {expected}, found {found}")]
    ShapeMismatch {
        address: Address,
        expected: &'static str,
        found: &'static str,
    },

    /// Tree traversal hit a non-indexable value before exhausting the address.
    #[error("address fault at `{address}`: cannot index into {found}")]
    AddressFault {
        address: Address,
        found: &'static str,
    },

    /// A signal was called or subscribed to incorrectly.
    #[error("signal `{signal}` misused: {detail}")]
    SignalUsage { signal: String, detail: String },

    /// A component definition is invalid (caught at construction, before any run).
    #[error("invalid component `{component}`: {detail}")]
    ComponentDefinition { component: String, detail: String },
}

impl Error {
    /// Build a shape-mismatch error for `address`.
    pub(crate) fn shape(address: Address, expected: &'static str, found: &'static str) -> Self {
        Error::ShapeMismatch {
            address,
            expected,
            found,
        }
    }

    /// Build an address-fault error for `address`.
    pub(crate) fn address(address: Address, found: &'static str) -> Self {
        Error::AddressFault { address, found }
    }
}
