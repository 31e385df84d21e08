//! Strongly typed configuration document.
//!
//! Every section defaults, so an empty document is a valid configuration.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConfigError, ConfigResult};

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent identity.
    pub agent: AgentSection,
    /// Model interaction settings.
    pub ai: AiSection,
    /// Scope enforcement and authentication.
    pub security: SecuritySection,
    /// Plugins and their capabilities.
    pub plugins: Vec<PluginConfig>,
    /// Global middleware applied to every capability.
    pub middleware: MiddlewareSection,
    /// Global conversation state settings.
    pub state_management: StateManagementConfig,
    /// Access policy per external tool server.
    pub tool_servers: Vec<ToolServerConfig>,
    /// Log output.
    pub logging: LoggingSection,
}

/// Agent identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Display name used in replies and logs.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Agent version.
    pub version: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: "Agent".into(),
            description: "AI agent".into(),
            version: "1.0.0".into(),
        }
    }
}

/// Model interaction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSection {
    /// Whether the model is consulted at all.
    pub enabled: bool,
    /// Overrides the built-in system instruction.
    pub system_prompt: Option<String>,
    /// Upper bound on function-calling rounds per turn.
    pub max_function_rounds: u32,
    /// Timeout for one model call, in seconds.
    pub model_timeout_secs: u64,
    /// Timeout for one function call, in seconds.
    pub tool_timeout_secs: u64,
    /// Number of prior history entries included in the prompt.
    pub history_window: usize,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            enabled: true,
            system_prompt: None,
            max_function_rounds: 5,
            model_timeout_secs: 60,
            tool_timeout_secs: 30,
            history_window: 10,
        }
    }
}

/// Scope enforcement and authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// Whether capability scopes are enforced.
    pub enabled: bool,
    /// Parent scope to the scopes it implies.
    pub scope_hierarchy: BTreeMap<String, Vec<String>>,
    /// Credential configuration.
    pub auth: AuthSection,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            enabled: true,
            scope_hierarchy: BTreeMap::new(),
            auth: AuthSection::default(),
        }
    }
}

/// Static credentials and the policy for callers without any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Accepted API keys.
    pub api_keys: Vec<CredentialGrant>,
    /// Accepted bearer tokens.
    pub bearer_tokens: Vec<CredentialGrant>,
    /// Tools offered to unauthenticated callers.
    pub unauthenticated_policy: UnauthenticatedPolicy,
}

/// A credential and what it grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialGrant {
    /// Key or token value.
    #[serde(alias = "key", alias = "token")]
    pub secret: String,
    /// User the credential identifies.
    #[serde(default = "default_grant_user")]
    pub user_id: String,
    /// Scopes granted before hierarchy expansion.
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_grant_user() -> String {
    "default".into()
}

/// Tools offered when a turn carries no authentication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnauthenticatedPolicy {
    /// No tools.
    #[default]
    FailClosed,
    /// Every registered tool, unfiltered. Development only.
    AllowAll,
}

/// A plugin and the capabilities it contributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Plugin identifier.
    pub plugin_id: String,
    /// Disabled plugins contribute nothing.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Per-capability settings.
    #[serde(default)]
    pub capabilities: Vec<PluginCapabilityConfig>,
    /// Scopes for capabilities without their own list.
    #[serde(default)]
    pub default_scopes: Vec<String>,
    /// Replaces the global middleware for this plugin's capabilities.
    #[serde(default)]
    pub middleware_override: Option<MiddlewareSection>,
    /// Replaces the global state settings for this plugin's capabilities.
    #[serde(default)]
    pub state_override: Option<StateManagementConfig>,
}

/// Settings of one capability within a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginCapabilityConfig {
    /// Capability identifier.
    pub capability_id: String,
    /// Scopes a caller must hold.
    #[serde(default)]
    pub required_scopes: Vec<String>,
    /// Disabled capabilities are not registered.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Replaces both plugin and global middleware for this capability.
    #[serde(default)]
    pub middleware_override: Option<MiddlewareSection>,
}

fn enabled() -> bool {
    true
}

/// One middleware in list form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareEntry {
    /// Middleware name, e.g. `rate_limited`.
    pub name: String,
    /// Middleware parameters; null selects the defaults.
    #[serde(default)]
    pub params: Value,
}

impl MiddlewareEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// Middleware declaration, either as an ordered list or as named sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MiddlewareSection {
    /// Ordered list, outermost first.
    List(Vec<MiddlewareEntry>),
    /// Named sections, each with an optional `enabled` flag.
    Structured(StructuredMiddleware),
}

impl Default for MiddlewareSection {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl MiddlewareSection {
    /// Normalises the declaration into list form.
    ///
    /// Structured sections are ordered timing, rate limiting, caching, retry.
    #[must_use]
    pub fn entries(&self) -> Vec<MiddlewareEntry> {
        match self {
            Self::List(entries) => entries.clone(),
            Self::Structured(structured) if !structured.enabled => Vec::new(),
            Self::Structured(structured) => [
                ("timed", &structured.timing),
                ("rate_limited", &structured.rate_limiting),
                ("cached", &structured.caching),
                ("retryable", &structured.retry),
            ]
            .into_iter()
            .filter_map(|(name, section)| section_entry(name, section.as_ref()?))
            .collect(),
        }
    }
}

fn section_entry(name: &str, section: &Map<String, Value>) -> Option<MiddlewareEntry> {
    if section.get("enabled").and_then(Value::as_bool) == Some(false) {
        return None;
    }
    let mut params = section.clone();
    params.remove("enabled");
    Some(MiddlewareEntry::new(name, Value::Object(params)))
}

/// Named-section middleware form. Absent sections are disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredMiddleware {
    /// Master switch.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Rate limiter parameters.
    #[serde(default)]
    pub rate_limiting: Option<Map<String, Value>>,
    /// Cache parameters.
    #[serde(default)]
    pub caching: Option<Map<String, Value>>,
    /// Retry parameters.
    #[serde(default)]
    pub retry: Option<Map<String, Value>>,
    /// Timing switch; parameters are ignored.
    #[serde(default)]
    pub timing: Option<Map<String, Value>>,
}

/// Storage backend for conversation state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    /// Process memory.
    #[default]
    Memory,
    /// One JSON file per conversation.
    File,
    /// Networked key-value store.
    #[serde(alias = "valkey", alias = "redis")]
    Kv,
}

/// Conversation state settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateManagementConfig {
    /// Whether capabilities receive a state handle.
    pub enabled: bool,
    /// Storage backend.
    pub backend: StateBackendKind,
    /// Directory used by the file backend.
    pub storage_dir: PathBuf,
    /// Key prefix used by the key-value backend.
    pub key_prefix: String,
    /// Expiry of key-value documents; `None` keeps them forever.
    pub ttl_secs: Option<u64>,
}

impl Default for StateManagementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: StateBackendKind::Memory,
            storage_dir: PathBuf::from("./conversation_states"),
            key_prefix: "agent:state:".into(),
            ttl_secs: Some(3600),
        }
    }
}

/// Access policy for one external tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    /// Server name; matches the connection's name.
    pub name: String,
    /// Required scopes per server-side tool identifier.
    #[serde(default)]
    pub tool_scopes: HashMap<String, Vec<String>>,
    /// Scopes for tools absent from `tool_scopes`.
    #[serde(default)]
    pub default_scopes: Vec<String>,
    /// When non-empty, only these tools are registered.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Tools never registered.
    #[serde(default)]
    pub blocked_tools: Vec<String>,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default level directive, overridden by `RUST_LOG`.
    pub level: String,
    /// `pretty`, `compact` or `json`.
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "compact".into(),
        }
    }
}

impl AgentConfig {
    /// Checks constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violation.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.agent.name.trim().is_empty() {
            return Err(ConfigError::invalid("agent.name cannot be empty"));
        }
        if self.ai.max_function_rounds == 0 {
            return Err(ConfigError::invalid("ai.max_function_rounds must be at least 1"));
        }
        if self.ai.model_timeout_secs == 0 || self.ai.tool_timeout_secs == 0 {
            return Err(ConfigError::invalid("ai timeouts must be positive"));
        }
        if self.ai.history_window == 0 {
            return Err(ConfigError::invalid("ai.history_window must be at least 1"));
        }

        let mut plugins = HashSet::new();
        let mut capabilities = HashSet::new();
        for plugin in &self.plugins {
            if plugin.plugin_id.trim().is_empty() {
                return Err(ConfigError::invalid("plugin_id cannot be empty"));
            }
            if !plugins.insert(plugin.plugin_id.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "duplicate plugin `{}`",
                    plugin.plugin_id
                )));
            }
            for capability in &plugin.capabilities {
                if capability.capability_id.trim().is_empty() {
                    return Err(ConfigError::invalid(format!(
                        "plugin `{}` declares a capability without an id",
                        plugin.plugin_id
                    )));
                }
                if !capabilities.insert(capability.capability_id.as_str()) {
                    return Err(ConfigError::invalid(format!(
                        "capability `{}` is declared more than once",
                        capability.capability_id
                    )));
                }
            }
        }

        let sections = std::iter::once(&self.middleware)
            .chain(self.plugins.iter().filter_map(|p| p.middleware_override.as_ref()))
            .chain(
                self.plugins
                    .iter()
                    .flat_map(|p| &p.capabilities)
                    .filter_map(|c| c.middleware_override.as_ref()),
            );
        for section in sections {
            if section.entries().iter().any(|entry| entry.name.trim().is_empty()) {
                return Err(ConfigError::invalid("middleware entries need a name"));
            }
        }

        let mut servers = HashSet::new();
        for server in &self.tool_servers {
            if !servers.insert(server.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "duplicate tool server `{}`",
                    server.name
                )));
            }
        }
        Ok(())
    }

    /// Plugin that declares `capability_id`, if any.
    #[must_use]
    pub fn plugin_for(&self, capability_id: &str) -> Option<&PluginConfig> {
        self.plugins.iter().find(|plugin| {
            plugin
                .capabilities
                .iter()
                .any(|capability| capability.capability_id == capability_id)
        })
    }

    /// Capability entry for `capability_id`, if declared.
    #[must_use]
    pub fn capability(&self, capability_id: &str) -> Option<&PluginCapabilityConfig> {
        self.plugins
            .iter()
            .flat_map(|plugin| &plugin.capabilities)
            .find(|capability| capability.capability_id == capability_id)
    }

    /// Configured scopes for `capability_id`: its own list, else the
    /// plugin's defaults. `None` when the capability is not declared.
    #[must_use]
    pub fn required_scopes(&self, capability_id: &str) -> Option<BTreeSet<String>> {
        let plugin = self.plugin_for(capability_id)?;
        let capability = self.capability(capability_id)?;
        let scopes = if capability.required_scopes.is_empty() {
            &plugin.default_scopes
        } else {
            &capability.required_scopes
        };
        Some(scopes.iter().cloned().collect())
    }

    /// Whether `capability_id` may be registered. Undeclared capabilities are
    /// enabled.
    #[must_use]
    pub fn is_enabled(&self, capability_id: &str) -> bool {
        match (self.plugin_for(capability_id), self.capability(capability_id)) {
            (Some(plugin), Some(capability)) => plugin.enabled && capability.enabled,
            _ => true,
        }
    }

    /// Middleware for `capability_id`: capability override, else plugin
    /// override, else the global list.
    #[must_use]
    pub fn middleware_for(&self, capability_id: &str) -> Vec<MiddlewareEntry> {
        self.capability(capability_id)
            .and_then(|capability| capability.middleware_override.as_ref())
            .or_else(|| {
                self.plugin_for(capability_id)
                    .and_then(|plugin| plugin.middleware_override.as_ref())
            })
            .unwrap_or(&self.middleware)
            .entries()
    }

    /// State settings for `capability_id`: plugin override, else global.
    #[must_use]
    pub fn state_for(&self, capability_id: &str) -> &StateManagementConfig {
        self.plugin_for(capability_id)
            .and_then(|plugin| plugin.state_override.as_ref())
            .unwrap_or(&self.state_management)
    }

    /// Policy entry for the tool server `name`.
    #[must_use]
    pub fn tool_server(&self, name: &str) -> Option<&ToolServerConfig> {
        self.tool_servers.iter().find(|server| server.name == name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config(value: Value) -> AgentConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn empty_document_is_valid_defaults() {
        let config = config(json!({}));
        assert_eq!(config, AgentConfig::default());
        assert!(config.validate().is_ok());
        assert!(config.middleware.entries().is_empty());
        assert_eq!(
            config.security.auth.unauthenticated_policy,
            UnauthenticatedPolicy::FailClosed
        );
        assert_eq!(config.state_management.key_prefix, "agent:state:");
    }

    #[test]
    fn structured_middleware_normalises_in_fixed_order() {
        let config = config(json!({
            "middleware": {
                "retry": {"max_attempts": 2},
                "caching": {"enabled": false, "default_ttl": 10},
                "rate_limiting": {"requests_per_minute": 30},
                "timing": {}
            }
        }));
        let entries = config.middleware.entries();
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, ["timed", "rate_limited", "retryable"]);
        assert_eq!(entries[1].params, json!({"requests_per_minute": 30}));

        let disabled = self::config(json!({"middleware": {"enabled": false, "retry": {}}}));
        assert!(disabled.middleware.entries().is_empty());
    }

    #[test]
    fn overrides_resolve_capability_then_plugin_then_global() {
        let config = config(json!({
            "middleware": [{"name": "timed"}],
            "state_management": {"enabled": true},
            "plugins": [{
                "plugin_id": "weather",
                "default_scopes": ["weather:read"],
                "middleware_override": [{"name": "cached", "params": {"default_ttl": 5}}],
                "state_override": {"enabled": false},
                "capabilities": [
                    {"capability_id": "forecast"},
                    {"capability_id": "alerts", "required_scopes": ["weather:admin"],
                     "middleware_override": []}
                ]
            }]
        }));
        assert_eq!(config.middleware_for("forecast")[0].name, "cached");
        assert!(config.middleware_for("alerts").is_empty());
        assert_eq!(config.middleware_for("other")[0].name, "timed");

        assert!(!config.state_for("forecast").enabled);
        assert!(config.state_for("other").enabled);

        assert_eq!(
            config.required_scopes("forecast"),
            Some(BTreeSet::from(["weather:read".to_owned()]))
        );
        assert_eq!(
            config.required_scopes("alerts"),
            Some(BTreeSet::from(["weather:admin".to_owned()]))
        );
        assert_eq!(config.required_scopes("other"), None);
    }

    #[test]
    fn disabled_plugins_disable_their_capabilities() {
        let config = config(json!({
            "plugins": [{"plugin_id": "p", "enabled": false,
                         "capabilities": [{"capability_id": "c"}]}]
        }));
        assert!(!config.is_enabled("c"));
        assert!(config.is_enabled("undeclared"));
    }

    #[test]
    fn validation_rejects_duplicates_and_zero_bounds() {
        let duplicate = config(json!({
            "plugins": [
                {"plugin_id": "a", "capabilities": [{"capability_id": "c"}]},
                {"plugin_id": "b", "capabilities": [{"capability_id": "c"}]}
            ]
        }));
        assert!(matches!(duplicate.validate(), Err(ConfigError::Invalid { .. })));

        let zero = config(json!({"ai": {"max_function_rounds": 0}}));
        assert!(zero.validate().is_err());

        let servers = config(json!({"tool_servers": [{"name": "fs"}, {"name": "fs"}]}));
        assert!(servers.validate().is_err());
    }

    #[test]
    fn credential_grants_accept_key_alias() {
        let config = config(json!({
            "security": {"auth": {
                "api_keys": [{"key": "k-123", "user_id": "alice", "scopes": ["files:read"]}],
                "unauthenticated_policy": "allow_all"
            }}
        }));
        assert_eq!(config.security.auth.api_keys[0].secret, "k-123");
        assert_eq!(
            config.security.auth.unauthenticated_policy,
            UnauthenticatedPolicy::AllowAll
        );
    }
}
