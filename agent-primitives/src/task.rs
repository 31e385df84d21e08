//! Inbound task model handed to the dispatcher and capability executors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Author of a task message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Message written by the end user.
    User,
    /// Message produced by the agent.
    Agent,
}

/// One part of a multi-part message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePart {
    /// Plain text.
    Text {
        /// Text content.
        text: String,
    },
    /// Structured payload.
    Data {
        /// Arbitrary JSON content.
        data: Value,
    },
}

/// Message exchanged within a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    message_id: String,
    role: MessageRole,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

impl TaskMessage {
    /// Creates a single-part text message.
    #[must_use]
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self::with_parts(role, vec![MessagePart::Text { text: text.into() }])
    }

    /// Creates a message from explicit parts.
    #[must_use]
    pub fn with_parts(role: MessageRole, parts: Vec<MessagePart>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            role,
            parts,
            content: None,
        }
    }

    /// Creates a legacy message carrying only a flat `content` field.
    #[must_use]
    pub fn flat(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            role,
            parts: Vec::new(),
            content: Some(content.into()),
        }
    }

    /// Returns the message identifier.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Returns the author role.
    #[must_use]
    pub fn role(&self) -> MessageRole {
        self.role
    }

    /// Returns the structured parts.
    #[must_use]
    pub fn parts(&self) -> &[MessagePart] {
        &self.parts
    }

    /// Returns the text of the message: concatenated text parts when any are
    /// present, otherwise the flat content.
    #[must_use]
    pub fn text_content(&self) -> Option<String> {
        let from_parts: String = self
            .parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::Data { .. } => None,
            })
            .collect();
        if !from_parts.is_empty() {
            return Some(from_parts);
        }
        self.content.clone().filter(|content| !content.is_empty())
    }
}

/// Unit of work submitted by the front-end layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context_id: Option<String>,
    #[serde(default)]
    history: Vec<TaskMessage>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl Task {
    /// Creates an empty task with the supplied identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context_id: None,
            history: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Creates a task with a random identifier holding one user message.
    #[must_use]
    pub fn from_user_text(text: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string())
            .with_message(TaskMessage::text(MessageRole::User, text))
    }

    /// Sets the conversation identifier.
    #[must_use]
    pub fn with_context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    /// Appends a message to the task history.
    #[must_use]
    pub fn with_message(mut self, message: TaskMessage) -> Self {
        self.history.push(message);
        self
    }

    /// Inserts a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns the task identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the explicit conversation identifier, if any.
    #[must_use]
    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref()
    }

    /// Conversation key: the explicit context id, falling back to the task id.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        self.context_id.as_deref().unwrap_or(&self.id)
    }

    /// Returns the message history.
    #[must_use]
    pub fn history(&self) -> &[TaskMessage] {
        &self.history
    }

    /// Returns task metadata.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Latest user-authored text, falling back to the `user_input` metadata entry.
    #[must_use]
    pub fn latest_user_text(&self) -> Option<String> {
        self.history
            .iter()
            .rev()
            .filter(|message| message.role == MessageRole::User)
            .find_map(TaskMessage::text_content)
            .or_else(|| {
                self.metadata
                    .get("user_input")
                    .and_then(Value::as_str)
                    .filter(|text| !text.is_empty())
                    .map(str::to_owned)
            })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn prefers_text_parts_over_flat_content() {
        let message = TaskMessage::with_parts(
            MessageRole::User,
            vec![
                MessagePart::Text { text: "Hello ".into() },
                MessagePart::Data { data: json!({"ignored": true}) },
                MessagePart::Text { text: "there".into() },
            ],
        );
        assert_eq!(message.text_content().as_deref(), Some("Hello there"));
    }

    #[test]
    fn latest_user_message_wins() {
        let task = Task::new("t-1")
            .with_message(TaskMessage::text(MessageRole::User, "first"))
            .with_message(TaskMessage::text(MessageRole::Agent, "reply"))
            .with_message(TaskMessage::flat(MessageRole::User, "second"));
        assert_eq!(task.latest_user_text().as_deref(), Some("second"));
    }

    #[test]
    fn falls_back_to_metadata_input() {
        let task = Task::new("t-2").with_metadata("user_input", json!("from metadata"));
        assert_eq!(task.latest_user_text().as_deref(), Some("from metadata"));
        assert!(Task::new("t-3").latest_user_text().is_none());
    }

    #[test]
    fn conversation_id_defaults_to_task_id() {
        let task = Task::new("t-4");
        assert_eq!(task.conversation_id(), "t-4");
        let task = task.with_context_id("ctx");
        assert_eq!(task.conversation_id(), "ctx");
    }

    #[test]
    fn deserializes_tagged_parts() {
        let task: Task = serde_json::from_value(json!({
            "id": "t-5",
            "history": [{
                "message_id": "m-1",
                "role": "user",
                "parts": [{"kind": "text", "text": "hi"}]
            }]
        }))
        .unwrap();
        assert_eq!(task.latest_user_text().as_deref(), Some("hi"));
    }
}
