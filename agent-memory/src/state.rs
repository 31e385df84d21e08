//! Conversation state document.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum number of history entries retained per conversation.
pub const MAX_HISTORY_ENTRIES: usize = 100;

/// Author of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// End-user input.
    User,
    /// Agent reply.
    Assistant,
    /// System instruction.
    System,
    /// Function or tool output.
    Tool,
}

/// One recorded message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Author of the message.
    pub role: TurnRole,
    /// Message text.
    pub content: String,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl HistoryEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// Attaches metadata to the entry.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Variables, metadata, and bounded history for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    context_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    variables: Map<String, Value>,
    #[serde(default)]
    history: VecDeque<HistoryEntry>,
}

impl ConversationState {
    /// Creates an empty state for `context_id`.
    #[must_use]
    pub fn new(context_id: impl Into<String>, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            context_id: context_id.into(),
            user_id,
            created_at: now,
            updated_at: now,
            metadata: Map::new(),
            variables: Map::new(),
            history: VecDeque::new(),
        }
    }

    /// Returns the conversation identifier.
    #[must_use]
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Returns the owning user, if known.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Returns the creation instant.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the instant of the last mutation.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the metadata map.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Returns the variables map.
    #[must_use]
    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Returns a variable by name.
    #[must_use]
    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Sets the owning user when it was not known at creation.
    pub fn set_user_id(&mut self, user_id: impl Into<String>) {
        self.user_id = Some(user_id.into());
        self.touch();
    }

    /// Sets a variable.
    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
        self.touch();
    }

    /// Sets a metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
        self.touch();
    }

    /// Appends an entry, dropping the oldest ones beyond
    /// [`MAX_HISTORY_ENTRIES`].
    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push_back(entry);
        while self.history.len() > MAX_HISTORY_ENTRIES {
            self.history.pop_front();
        }
        self.touch();
    }

    /// Returns the full retained history, oldest first.
    #[must_use]
    pub fn history(&self) -> &VecDeque<HistoryEntry> {
        &self.history
    }

    /// Returns at most `limit` of the most recent entries, oldest first.
    #[must_use]
    pub fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn history_is_capped_at_most_recent_entries() {
        let mut state = ConversationState::new("ctx", None);
        for index in 0..130 {
            state.push_history(HistoryEntry::new(TurnRole::User, format!("message {index}")));
        }

        assert_eq!(state.history().len(), MAX_HISTORY_ENTRIES);
        assert_eq!(state.history().front().unwrap().content, "message 30");
        assert_eq!(state.history().back().unwrap().content, "message 129");
    }

    #[test]
    fn recent_history_returns_tail_in_order() {
        let mut state = ConversationState::new("ctx", Some("u1".into()));
        for content in ["a", "b", "c"] {
            state.push_history(HistoryEntry::new(TurnRole::User, content));
        }
        let recent: Vec<_> = state
            .recent_history(2)
            .into_iter()
            .map(|entry| entry.content)
            .collect();
        assert_eq!(recent, ["b", "c"]);
        assert_eq!(state.recent_history(10).len(), 3);
    }

    #[test]
    fn mutations_bump_updated_at() {
        let mut state = ConversationState::new("ctx", None);
        let created = state.updated_at();
        state.set_variable("count", json!(1));
        assert!(state.updated_at() >= created);
        assert_eq!(state.variable("count"), Some(&json!(1)));
    }

    #[test]
    fn serde_round_trip_preserves_history() {
        let mut state = ConversationState::new("ctx", Some("u1".into()));
        state.push_history(HistoryEntry::new(TurnRole::Assistant, "hi"));
        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: ConversationState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, state);
    }
}
