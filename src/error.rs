//! Error taxonomy for the listener.
//!
//! Only [`ListenerError::Precondition`] and [`ListenerError::ConfigNotFound`]
//! are ever returned by the non-`try_*` coordinator operations. Transport
//! faults are logged and surface as `None`, and malformed messages become
//! empty documents.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ListenerError> = std::result::Result<T, E>;

/// Top-level error for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// No usable broker configuration (missing file, bad JSON, unknown default broker).
    #[error("no broker configuration found: {0}")]
    ConfigNotFound(String),

    /// A caller-supplied argument violated a hard precondition.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A structured payload could not be normalized.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Broker connect/session/consume failure.
    #[error(transparent)]
    Connection(#[from] ConnectionFault),

    /// `take_oldest` on an empty result buffer.
    #[error("result buffer is empty")]
    EmptyBuffer,
}

/// Failure talking to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionFault {
    #[error("broker unreachable at {url}")]
    Unreachable { url: String },

    #[error("authentication failed for user '{user}'")]
    Authentication { user: String },

    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("connection is closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Malformed structured payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// A map entry has no same-named string property naming its target field.
    #[error("map entry '{key}' has no string property naming its target field")]
    MissingFieldProperty { key: String },
}
