//! Access decisions returned by scope validation.

use serde::{Deserialize, Serialize};

/// Outcome of checking held scopes against required scopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    allowed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    missing: Vec<String>,
}

impl AccessDecision {
    /// Returns a granting decision.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            missing: Vec::new(),
        }
    }

    /// Returns a denying decision listing the scopes that were not held.
    #[must_use]
    pub fn deny(missing: Vec<String>) -> Self {
        Self {
            allowed: false,
            missing,
        }
    }

    /// Returns true when every required scope is held.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Returns the required scopes that were not held.
    #[must_use]
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// Consumes the decision and returns the missing scopes.
    #[must_use]
    pub fn into_missing(self) -> Vec<String> {
        self.missing
    }
}
