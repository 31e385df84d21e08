//! Log output for agents.
//!
//! [`init_tracing`] installs the process-wide `tracing` subscriber. `RUST_LOG`
//! takes precedence over the configured level.

#![warn(missing_docs, clippy::pedantic)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors raised while configuring telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialised,
    /// The level directive could not be parsed.
    #[error("invalid log filter `{directive}`: {reason}")]
    InvalidFilter {
        /// Rejected directive.
        directive: String,
        /// Parser message.
        reason: String,
    },
    /// Unknown output format name.
    #[error("unknown log format `{0}`")]
    UnknownFormat(String),
}

/// Output layout of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line, human oriented.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" | "text" => Ok(Self::Compact),
            "json" | "structured" => Ok(Self::Json),
            _ => Err(TelemetryError::UnknownFormat(value.to_owned())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default filter directive, e.g. `info` or `agent_kernel=debug`.
    pub level: String,
    /// Output layout.
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}

impl TelemetryConfig {
    /// Builds settings from textual level and format values.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::UnknownFormat`] for an unknown format.
    pub fn from_parts(level: impl Into<String>, format: &str) -> Result<Self, TelemetryError> {
        Ok(Self {
            level: level.into(),
            format: format.parse()?,
        })
    }

    /// Resolves the filter: `RUST_LOG` when set, else the configured level.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidFilter`] when the configured level
    /// does not parse.
    pub fn filter(&self) -> Result<EnvFilter, TelemetryError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.level).map_err(|e| TelemetryError::InvalidFilter {
            directive: self.level.clone(),
            reason: e.to_string(),
        })
    }
}

/// Installs the global subscriber described by `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::AlreadyInitialised`] when a subscriber exists
/// and [`TelemetryError::InvalidFilter`] for a bad level directive.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let builder = tracing_subscriber::fmt().with_env_filter(config.filter()?);
    let installed = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|_| TelemetryError::AlreadyInitialised)?;
    tracing::debug!(level = %config.level, format = %config.format, "tracing initialised");
    Ok(())
}
