use thiserror::Error;

/// Result alias for prompt construction.
pub type PromptResult<T> = Result<T, PromptError>;

/// Errors raised while building prompt components.
#[derive(Debug, Error)]
pub enum PromptError {
    /// The system instruction was blank.
    #[error("system instruction cannot be empty")]
    EmptyInstruction,
    /// The history window was zero.
    #[error("history window must hold at least one turn")]
    InvalidWindow,
}
