//! Configuration for agents: the typed document, YAML/JSON loading with
//! environment expansion, and the per-capability resolution rules.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigFormat, expand_env, expand_env_with, load, parse, save};
pub use schema::{
    AgentConfig, AgentSection, AiSection, AuthSection, CredentialGrant, LoggingSection,
    MiddlewareEntry, MiddlewareSection, PluginCapabilityConfig, PluginConfig, SecuritySection,
    StateBackendKind, StateManagementConfig, StructuredMiddleware, ToolServerConfig,
    UnauthenticatedPolicy,
};
