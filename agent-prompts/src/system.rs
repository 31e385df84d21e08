use crate::error::{PromptError, PromptResult};

/// Instruction used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an AI agent with access to specific functions/skills.

Your role:
- Understand user requests naturally
- Use the appropriate functions when needed
- Provide helpful, conversational responses
- Maintain context across the conversation

When users ask for something:
1. If you have a relevant function, call it with appropriate parameters
2. If multiple functions are needed, call them in logical order
3. Synthesize the results into a natural, helpful response
4. If no function is needed, respond conversationally

Always be helpful, accurate, and maintain a friendly tone.";

/// Represents a system instruction applied to all downstream prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInstruction {
    content: String,
}

impl Default for SystemInstruction {
    fn default() -> Self {
        Self {
            content: DEFAULT_SYSTEM_PROMPT.to_owned(),
        }
    }
}

/// Builder for [`SystemInstruction`].
#[derive(Debug, Default)]
pub struct SystemInstructionBuilder {
    content: Option<String>,
}

impl SystemInstructionBuilder {
    /// Creates a new builder instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instruction content.
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Builds the instruction, using [`DEFAULT_SYSTEM_PROMPT`] when no
    /// content was supplied.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::EmptyInstruction`] for blank content.
    pub fn build(self) -> PromptResult<SystemInstruction> {
        match self.content {
            Some(content) if content.trim().is_empty() => Err(PromptError::EmptyInstruction),
            Some(content) => Ok(SystemInstruction { content }),
            None => Ok(SystemInstruction::default()),
        }
    }
}

impl SystemInstruction {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> SystemInstructionBuilder {
        SystemInstructionBuilder::new()
    }

    /// Returns the textual content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_built_in_prompt() {
        let instruction = SystemInstruction::builder().build().unwrap();
        assert!(instruction.content().starts_with("You are an AI agent"));
    }

    #[test]
    fn rejects_blank_content() {
        assert!(matches!(
            SystemInstruction::builder().content("  ").build(),
            Err(PromptError::EmptyInstruction)
        ));
    }
}
