//! Capability dispatch with scope enforcement for AI agents.
//!
//! Depend on this crate to get the component crates behind feature flags.
//! All of them are enabled by default.

#![warn(missing_docs, clippy::pedantic)]

/// Capability descriptors, tasks and the shared error type.
pub use agent_primitives as primitives;

/// Capability registry, application context and dispatcher (enabled by `kernel` feature).
#[cfg(feature = "kernel")]
pub use agent_kernel as kernel;

/// Chat model interface and function-calling fallback (enabled by `adapters` feature).
#[cfg(feature = "adapters")]
pub use agent_adapters as adapters;

/// Scoped tool registry and tool-server plumbing (enabled by `tools` feature).
#[cfg(feature = "tools")]
pub use agent_tools as tools;

/// Rate limiting, caching, retry and timing layers (enabled by `middleware` feature).
#[cfg(feature = "middleware")]
pub use agent_middleware as middleware;

/// Conversation state store (enabled by `memory` feature).
#[cfg(feature = "memory")]
pub use agent_memory as memory;

/// Scope hierarchy, authentication and audit (enabled by `policy` feature).
#[cfg(feature = "policy")]
pub use agent_policy as policy;

/// Tracing subscriber setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use agent_telemetry as telemetry;

/// System instructions and prompt composition (enabled by `prompts` feature).
#[cfg(feature = "prompts")]
pub use agent_prompts as prompts;

/// Agent configuration loading (enabled by `config` feature).
#[cfg(feature = "config")]
pub use agent_config as config;
