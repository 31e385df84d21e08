//! Error types for the state store.

use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by state storage components.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The provided configuration was invalid.
    #[error("invalid state configuration: {0}")]
    InvalidConfig(&'static str),
    /// Underlying I/O failure while reading or writing state files.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// Serialization or deserialization error.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
    /// Context identifier cannot be mapped onto the backend.
    #[error("invalid context id `{id}`")]
    InvalidContextId {
        /// The rejected identifier.
        id: String,
    },
    /// Key-value backend reported an application error.
    #[error("state backend error: {reason}")]
    Backend {
        /// Human-readable reason describing the failure.
        reason: String,
    },
}

impl MemoryError {
    /// Helper to construct backend errors from string-like values.
    #[must_use]
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }
}

/// Result type alias for state operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
