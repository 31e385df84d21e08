//! Tool-server connections and their access policy.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ToolResult;

/// Tool as advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTool {
    /// Server-side identifier, possibly namespaced (`fs:read`).
    pub name: String,
    /// Human-readable purpose.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the parameters.
    #[serde(default = "empty_object_schema", alias = "inputSchema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl RemoteTool {
    /// Creates a tool description with an empty parameter schema.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_object_schema(),
        }
    }
}

/// Connection to an external tool server.
#[async_trait]
pub trait ToolServerConnection: Send + Sync {
    /// Stable server name.
    fn name(&self) -> &str;

    /// Establishes the session.
    async fn initialize(&self) -> ToolResult<()>;

    /// Whether [`Self::initialize`] has completed.
    fn is_initialized(&self) -> bool;

    /// Enumerates the tools offered by the server.
    async fn list_tools(&self) -> ToolResult<Vec<RemoteTool>>;

    /// Calls a tool by its server-side identifier.
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult<Value>;
}

/// Access rules applied when a server's tools are registered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerPolicy {
    /// Required scopes per server-side tool identifier.
    pub tool_scopes: HashMap<String, BTreeSet<String>>,
    /// Scopes for tools absent from `tool_scopes`. Empty leaves those tools
    /// unconfigured, so they are never offered.
    pub default_scopes: BTreeSet<String>,
    /// When non-empty, only these tools are registered.
    pub allowed_tools: BTreeSet<String>,
    /// Tools never registered.
    pub blocked_tools: BTreeSet<String>,
}

impl ToolServerPolicy {
    /// Whether the allow and block lists admit `tool`.
    #[must_use]
    pub fn admits(&self, tool: &str) -> bool {
        !self.blocked_tools.contains(tool)
            && (self.allowed_tools.is_empty() || self.allowed_tools.contains(tool))
    }

    /// Scopes required to use `tool`.
    #[must_use]
    pub fn scopes_for(&self, tool: &str) -> BTreeSet<String> {
        self.tool_scopes
            .get(tool)
            .cloned()
            .unwrap_or_else(|| self.default_scopes.clone())
    }
}
