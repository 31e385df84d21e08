//! Errors surfaced by scope enforcement and authentication.

use agent_primitives::CapabilityError;
use thiserror::Error;

/// Errors surfaced by policy components.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Caller lacks the scopes required for the subject.
    #[error("permission denied for `{subject}`: missing {missing:?}")]
    PermissionDenied {
        /// Capability or tool being accessed.
        subject: String,
        /// Required scopes the caller does not hold.
        missing: Vec<String>,
    },
    /// Credentials were absent, unknown, or expired.
    #[error("authentication failed: {reason}")]
    AuthenticationFailed {
        /// Human-readable explanation for logging and operators.
        reason: String,
    },
    /// Scope graph or authenticator configuration was invalid.
    #[error("invalid policy configuration: {reason}")]
    Configuration {
        /// Human-readable explanation.
        reason: String,
    },
    /// An audit sink failed to persist a record.
    #[error("audit sink failure: {reason}")]
    Audit {
        /// Human-readable explanation.
        reason: String,
    },
}

impl PolicyError {
    /// Helper to construct authentication failures.
    #[must_use]
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            reason: reason.into(),
        }
    }

    /// Helper to construct audit failures.
    #[must_use]
    pub fn audit(reason: impl Into<String>) -> Self {
        Self::Audit {
            reason: reason.into(),
        }
    }
}

/// Result alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

impl From<PolicyError> for CapabilityError {
    fn from(value: PolicyError) -> Self {
        match value {
            PolicyError::PermissionDenied { subject, missing } => {
                CapabilityError::PermissionDenied { subject, missing }
            }
            PolicyError::AuthenticationFailed { .. } => CapabilityError::PermissionDenied {
                subject: "authentication".into(),
                missing: Vec::new(),
            },
            other => CapabilityError::configuration(other.to_string()),
        }
    }
}
