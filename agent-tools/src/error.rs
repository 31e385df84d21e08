//! Errors produced by tool registration and invocation.

use agent_primitives::CapabilityError;
use thiserror::Error;

/// Result alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors produced by tool registration and invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Requested tool does not exist.
    #[error("tool `{name}` is not registered")]
    UnknownTool {
        /// Name of the missing tool.
        name: String,
    },

    /// Caller lacks a scope the tool requires, or the tool has none
    /// configured.
    #[error("permission denied for tool `{tool}`; missing scopes: {missing:?}")]
    PermissionDenied {
        /// Tool that was refused.
        tool: String,
        /// Required scopes the caller does not hold.
        missing: Vec<String>,
    },

    /// Tool server referenced by a tool is no longer registered.
    #[error("tool server `{server}` is not registered")]
    UnknownServer {
        /// Name of the missing server.
        server: String,
    },

    /// A tool server failed to initialise or answer.
    #[error("tool server `{server}` failed: {reason}")]
    Server {
        /// Server that failed.
        server: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Tool execution failed.
    #[error("tool execution failed: {reason}")]
    Execution {
        /// Human-readable error returned by the tool implementation.
        reason: String,
    },

    /// Registry state could not be read.
    #[error("tool registry unavailable: {reason}")]
    Internal {
        /// Human-readable reason.
        reason: String,
    },
}

impl ToolError {
    /// Creates an execution error from the supplied reason.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }

    /// Creates a server error.
    #[must_use]
    pub fn server(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Server {
            server: server.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn poisoned() -> Self {
        Self::Internal {
            reason: "registry lock poisoned".into(),
        }
    }
}

impl From<ToolError> for CapabilityError {
    fn from(value: ToolError) -> Self {
        match value {
            ToolError::UnknownTool { name } => CapabilityError::NotFound { id: name },
            ToolError::PermissionDenied { tool, missing } => CapabilityError::PermissionDenied {
                subject: tool,
                missing,
            },
            ToolError::UnknownServer { server } => CapabilityError::NotFound { id: server },
            err @ ToolError::Server { .. } => CapabilityError::provider(err.to_string()),
            ToolError::Execution { reason } => CapabilityError::Execution { reason },
            err @ ToolError::Internal { .. } => CapabilityError::execution(err.to_string()),
        }
    }
}
