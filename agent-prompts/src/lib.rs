//! Prompt construction for agents: the system instruction and the bounded
//! message window sent to the model on every turn.

#![warn(missing_docs, clippy::pedantic)]

mod composer;
mod error;
mod system;

pub use composer::{DEFAULT_HISTORY_WINDOW, PromptComposer, history_from_task};
pub use error::{PromptError, PromptResult};
pub use system::{DEFAULT_SYSTEM_PROMPT, SystemInstruction, SystemInstructionBuilder};
