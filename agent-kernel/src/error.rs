//! Errors raised while assembling the application context.

use agent_config::ConfigError;
use agent_memory::MemoryError;
use agent_policy::PolicyError;
use agent_primitives::CapabilityError;
use agent_prompts::PromptError;
use agent_tools::ToolError;
use thiserror::Error;

/// Result alias for kernel setup.
pub type KernelResult<T> = Result<T, KernelError>;

/// Failures while building an [`crate::AppContext`].
///
/// Per-turn failures never surface here; the dispatcher turns them into
/// replies.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// State backend could not be opened.
    #[error("state store unavailable: {0}")]
    Memory(#[from] MemoryError),
    /// Credential or hierarchy setup failed.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// Capability registration failed.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// A tool server could not be registered.
    #[error(transparent)]
    Tool(#[from] ToolError),
    /// Prompt settings were rejected.
    #[error(transparent)]
    Prompt(#[from] PromptError),
}
