//! Bounded prompt composition.

use agent_adapters::traits::PromptMessage;
use agent_memory::{HistoryEntry, TurnRole};
use agent_primitives::{MessageRole, Task};
use serde_json::Value;
use tracing::debug;

use crate::error::{PromptError, PromptResult};
use crate::system::SystemInstruction;

/// Number of prior history entries included by default.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Builds the message list sent to the model: system instruction, the most
/// recent history entries, then the current user message.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    instruction: SystemInstruction,
    history_window: usize,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(SystemInstruction::default())
    }
}

impl PromptComposer {
    /// Creates a composer with the default window.
    #[must_use]
    pub fn new(instruction: SystemInstruction) -> Self {
        Self {
            instruction,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    /// Sets how many prior entries are included.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::InvalidWindow`] for zero.
    pub fn with_history_window(mut self, window: usize) -> PromptResult<Self> {
        if window == 0 {
            return Err(PromptError::InvalidWindow);
        }
        self.history_window = window;
        Ok(self)
    }

    /// Returns the system instruction.
    #[must_use]
    pub fn instruction(&self) -> &SystemInstruction {
        &self.instruction
    }

    /// Returns the history window.
    #[must_use]
    pub fn history_window(&self) -> usize {
        self.history_window
    }

    /// Composes the prompt. Blank history entries are skipped.
    #[must_use]
    pub fn compose(&self, history: &[HistoryEntry], user_input: &str) -> Vec<PromptMessage> {
        let start = history.len().saturating_sub(self.history_window);
        let mut messages = Vec::with_capacity(self.history_window + 2);
        messages.push(PromptMessage::system(self.instruction.content()));
        messages.extend(
            history[start..]
                .iter()
                .filter(|entry| !entry.content.trim().is_empty())
                .map(to_prompt_message),
        );
        messages.push(PromptMessage::user(user_input));
        debug!(history = messages.len() - 2, "prompt composed");
        messages
    }
}

fn to_prompt_message(entry: &HistoryEntry) -> PromptMessage {
    match entry.role {
        TurnRole::User => PromptMessage::user(entry.content.clone()),
        TurnRole::Assistant => PromptMessage::assistant(entry.content.clone()),
        TurnRole::System => PromptMessage::system(entry.content.clone()),
        TurnRole::Tool => {
            let name = entry
                .metadata
                .get("function")
                .and_then(Value::as_str)
                .unwrap_or("tool");
            PromptMessage::function_result(name, entry.content.clone())
        }
    }
}

/// Converts a task's own message history into history entries, leaving out
/// the latest user message (the one being answered).
///
/// Used when no persisted conversation state is available.
#[must_use]
pub fn history_from_task(task: &Task) -> Vec<HistoryEntry> {
    let messages = task.history();
    let current = messages.iter().rposition(|message| {
        message.role() == MessageRole::User && message.text_content().is_some()
    });
    messages
        .iter()
        .enumerate()
        .filter(|(index, _)| Some(*index) != current)
        .filter_map(|(_, message)| {
            let role = match message.role() {
                MessageRole::User => TurnRole::User,
                MessageRole::Agent => TurnRole::Assistant,
            };
            message.text_content().map(|text| HistoryEntry::new(role, text))
        })
        .collect()
}
