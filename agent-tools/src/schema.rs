//! Tool descriptions presented to language models.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Longest function name accepted by function-calling providers.
pub const MAX_FUNCTION_NAME_LEN: usize = 64;

/// Where a tool comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOrigin {
    /// Function backed by a plugin capability or in-process handler.
    Local,
    /// Framework-provided function.
    Builtin,
    /// Tool exposed by a tool server.
    External {
        /// Owning server name.
        server: String,
    },
}

impl ToolOrigin {
    /// Short category label.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Builtin => "builtin",
            Self::External { .. } => "external",
        }
    }
}

/// Description of one callable function.
///
/// `name` is what the model sees and must satisfy provider naming rules;
/// `original_name` is what the owning handler or server expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    name: String,
    description: String,
    parameters: Value,
    origin: ToolOrigin,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    required_scopes: BTreeSet<String>,
    original_name: String,
}

impl ToolSchema {
    /// Creates a local schema with an empty object parameter schema and no
    /// required scopes.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            original_name: name.clone(),
            name,
            description: description.into(),
            parameters: json!({"type": "object", "properties": {}}),
            origin: ToolOrigin::Local,
            required_scopes: BTreeSet::new(),
        }
    }

    /// Sets the JSON schema of the parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the required scopes.
    #[must_use]
    pub fn with_required_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn with_origin(mut self, origin: ToolOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub(crate) fn renamed(mut self, name: String) -> Self {
        self.name = name;
        self
    }

    /// Name presented to the model.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable purpose.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// JSON schema of the parameters.
    #[must_use]
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Tool category.
    #[must_use]
    pub fn origin(&self) -> &ToolOrigin {
        &self.origin
    }

    /// Scopes a caller must hold. Empty means not configured.
    #[must_use]
    pub fn required_scopes(&self) -> &BTreeSet<String> {
        &self.required_scopes
    }

    /// Identifier understood by the owning handler or server.
    #[must_use]
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub(crate) fn same_definition(&self, other: &Self) -> bool {
        self.description == other.description && self.parameters == other.parameters
    }
}

/// Maps an arbitrary identifier onto `^[A-Za-z0-9_-]{1,64}$`.
///
/// Namespace separators and any other disallowed character become `_`.
#[must_use]
pub fn sanitize_function_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FUNCTION_NAME_LEN)
        .collect();
    if sanitized.is_empty() {
        sanitized.push_str("tool");
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separators_are_replaced() {
        assert_eq!(sanitize_function_name("filesystem:read_file"), "filesystem_read_file");
        assert_eq!(sanitize_function_name("a.b/c d"), "a_b_c_d");
        assert_eq!(sanitize_function_name("ok-name_1"), "ok-name_1");
    }

    #[test]
    fn names_are_bounded_and_non_empty() {
        assert_eq!(sanitize_function_name(&"x".repeat(100)).len(), MAX_FUNCTION_NAME_LEN);
        assert_eq!(sanitize_function_name(""), "tool");
    }

    #[test]
    fn schema_serializes_origin_tag() {
        let schema = ToolSchema::new("search", "Search the web")
            .with_origin(ToolOrigin::External {
                server: "web".into(),
            })
            .with_required_scopes(["web:read"]);
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["origin"], json!({"kind": "external", "server": "web"}));
        assert_eq!(value["required_scopes"], json!(["web:read"]));
    }
}
