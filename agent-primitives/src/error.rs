//! Shared error definitions for agent primitives.

use thiserror::Error;

/// Result alias used for primitive validation.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// Capability identifier failed validation.
    #[error("invalid capability id `{id}`: {reason}")]
    InvalidCapabilityId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Capability definition failed validation.
    #[error("invalid capability: {reason}")]
    InvalidCapability {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Plugin manifest failed validation.
    #[error("invalid plugin manifest: {reason}")]
    InvalidManifest {
        /// Human-readable reason for rejection.
        reason: String,
    },
}

/// Result alias for capability execution.
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

/// Failure taxonomy shared by every layer that executes capabilities or tools.
///
/// Security failures ([`CapabilityError::PermissionDenied`]) are never
/// downgraded by intermediate layers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// The caller does not hold the scopes required for the operation.
    #[error("insufficient permissions for `{subject}`: missing {missing:?}")]
    PermissionDenied {
        /// Capability or tool the caller attempted to use.
        subject: String,
        /// Scopes that were required but not held.
        missing: Vec<String>,
    },
    /// Unknown capability or tool identifier.
    #[error("`{id}` not found")]
    NotFound {
        /// Identifier that failed to resolve.
        id: String,
    },
    /// Model or tool-server transport failure.
    #[error("provider error: {reason}")]
    Provider {
        /// Human-readable explanation.
        reason: String,
    },
    /// Structural or per-capability configuration problem.
    #[error("configuration error: {reason}")]
    Configuration {
        /// Human-readable explanation.
        reason: String,
    },
    /// The call exceeded its rate-limit budget.
    #[error("rate limit exceeded for {key}")]
    RateLimitExceeded {
        /// Bucket key that ran out of tokens.
        key: String,
    },
    /// The executor itself failed.
    #[error("execution failed: {reason}")]
    Execution {
        /// Human-readable explanation.
        reason: String,
    },
    /// The operation did not complete within its deadline.
    #[error("`{operation}` timed out")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
    },
    /// The surrounding task was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl CapabilityError {
    /// Convenience constructor for [`CapabilityError::Execution`].
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`CapabilityError::Provider`].
    #[must_use]
    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`CapabilityError::Configuration`].
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`CapabilityError::NotFound`].
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Returns true for scope failures.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

impl From<Error> for CapabilityError {
    fn from(value: Error) -> Self {
        Self::configuration(value.to_string())
    }
}
