//! Loading and saving configuration documents.
//!
//! String values may reference environment variables as `${VAR}` or
//! `${VAR:default}`. Unset variables without a default keep the literal
//! reference so the mistake stays visible.

use std::borrow::Cow;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::AgentConfig;

static ENV_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("static pattern is valid"));

/// Serialisation format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML, also accepted for unknown extensions.
    Yaml,
    /// JSON.
    Json,
}

impl ConfigFormat {
    /// Picks the format from the file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// Loads, expands and validates the document at `path`.
///
/// A missing file yields the default configuration.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when the file cannot be read,
/// [`ConfigError::Parse`] for malformed documents and
/// [`ConfigError::Invalid`] when validation fails.
pub fn load(path: impl AsRef<Path>) -> ConfigResult<AgentConfig> {
    let path = path.as_ref();
    if !path.exists() {
        info!(path = %path.display(), "configuration file not found; using defaults");
        return Ok(AgentConfig::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loading configuration");
    parse(&raw, ConfigFormat::from_path(path))
}

/// Parses, expands and validates an in-memory document.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
pub fn parse(raw: &str, format: ConfigFormat) -> ConfigResult<AgentConfig> {
    if raw.trim().is_empty() {
        return Ok(AgentConfig::default());
    }
    let document: Value = match format {
        ConfigFormat::Json => {
            serde_json::from_str(raw).map_err(|e| ConfigError::parse(e.to_string()))?
        }
        ConfigFormat::Yaml => {
            serde_yaml::from_str(raw).map_err(|e| ConfigError::parse(e.to_string()))?
        }
    };
    let document = match document {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => expand_env(other),
    };
    let config: AgentConfig =
        serde_json::from_value(document).map_err(|e| ConfigError::parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Writes `config` to `path` in the format its extension selects.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if serialisation fails and
/// [`ConfigError::Io`] if the file cannot be written.
pub fn save(config: &AgentConfig, path: impl AsRef<Path>) -> ConfigResult<()> {
    let path = path.as_ref();
    let rendered = match ConfigFormat::from_path(path) {
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).map_err(|e| ConfigError::parse(e.to_string()))?
        }
        ConfigFormat::Yaml => {
            serde_yaml::to_string(config).map_err(|e| ConfigError::parse(e.to_string()))?
        }
    };
    let io_error = |source: std::io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, rendered).map_err(io_error)
}

/// Expands environment references in every string of `value`.
#[must_use]
pub fn expand_env(value: Value) -> Value {
    expand_env_with(value, &|name| std::env::var(name).ok())
}

/// Expands references using `lookup` instead of the process environment.
#[must_use]
pub fn expand_env_with(value: Value, lookup: &dyn Fn(&str) -> Option<String>) -> Value {
    match value {
        Value::String(text) => Value::String(expand_str(&text, lookup).into_owned()),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| expand_env_with(item, lookup))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, expand_env_with(item, lookup)))
                .collect(),
        ),
        other => other,
    }
}

fn expand_str<'a>(text: &'a str, lookup: &dyn Fn(&str) -> Option<String>) -> Cow<'a, str> {
    ENV_REFERENCE.replace_all(text, |captures: &Captures<'_>| {
        let reference = &captures[1];
        let (name, default) = match reference.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (reference, None),
        };
        lookup(name)
            .or_else(|| default.filter(|d| !d.is_empty()).map(str::to_owned))
            .unwrap_or_else(|| captures[0].to_owned())
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::schema::StateBackendKind;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn expands_references_with_defaults() {
        let env = lookup(&[("API_KEY", "secret"), ("PORT", "8080")]);
        let value = expand_env_with(
            json!({
                "key": "${API_KEY}",
                "url": "http://${HOST:localhost}:${PORT}",
                "list": ["${MISSING}", "${EMPTY:}", 3]
            }),
            &env,
        );
        assert_eq!(
            value,
            json!({
                "key": "secret",
                "url": "http://localhost:8080",
                "list": ["${MISSING}", "${EMPTY:}", 3]
            })
        );
    }

    #[test]
    fn parses_yaml_and_json() {
        let yaml = "agent:\n  name: Weather Bot\n\
                    state_management:\n  enabled: true\n  backend: valkey\n";
        let config = parse(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.agent.name, "Weather Bot");
        assert_eq!(config.state_management.backend, StateBackendKind::Kv);

        let config = parse(r#"{"ai": {"max_function_rounds": 2}}"#, ConfigFormat::Json).unwrap();
        assert_eq!(config.ai.max_function_rounds, 2);

        assert_eq!(parse("", ConfigFormat::Yaml).unwrap(), AgentConfig::default());
    }

    #[test]
    fn malformed_and_invalid_documents_are_rejected() {
        assert!(matches!(
            parse("agent: [unclosed", ConfigFormat::Yaml),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            parse("agent:\n  name: ''\n", ConfigFormat::Yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn missing_file_yields_defaults_and_save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yml");
        assert_eq!(load(&missing).unwrap(), AgentConfig::default());

        let mut config = AgentConfig::default();
        config.agent.name = "Saved".into();
        let path = dir.path().join("nested").join("agent.yml");
        save(&config, &path).unwrap();
        assert_eq!(load(&path).unwrap(), config);
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.JSON")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("agent")), ConfigFormat::Yaml);
    }
}
