use std::path::PathBuf;

use agent_primitives::CapabilityError;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read or written.
    #[error("failed to access configuration file {path}: {source}")]
    Io {
        /// File that was accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid YAML/JSON or does not match the schema.
    #[error("failed to parse configuration: {reason}")]
    Parse {
        /// Parser message.
        reason: String,
    },
    /// The document parsed but violates a constraint.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Violated constraint.
        reason: String,
    },
}

impl ConfigError {
    /// Convenience constructor for parse failures.
    #[must_use]
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for validation failures.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for CapabilityError {
    fn from(value: ConfigError) -> Self {
        CapabilityError::configuration(value.to_string())
    }
}
