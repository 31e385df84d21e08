//! High-level conversation context operations over a [`StateStorage`].

use std::fmt;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::state::{ConversationState, HistoryEntry, TurnRole};
use crate::storage::StateStorage;
use crate::MemoryResult;

/// Conversation operations shared by the dispatcher and stateful capabilities.
///
/// Each operation is a read-modify-write against the backend. Concurrent
/// turns on the same context are not serialised: the last write wins.
#[derive(Clone)]
pub struct ConversationContext {
    storage: Arc<dyn StateStorage>,
}

impl fmt::Debug for ConversationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationContext")
            .field("backend", &self.storage.backend())
            .finish()
    }
}

impl ConversationContext {
    /// Wraps a storage backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StateStorage>) -> Self {
        Self { storage }
    }

    /// Returns the backend label.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.storage.backend()
    }

    /// Loads the state for `context_id`, creating and storing an empty one
    /// on first reference.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn get_or_create(
        &self,
        context_id: &str,
        user_id: Option<&str>,
    ) -> MemoryResult<ConversationState> {
        if let Some(mut state) = self.storage.get(context_id).await? {
            if state.user_id().is_none() {
                if let Some(user_id) = user_id {
                    state.set_user_id(user_id);
                    self.storage.set(&state).await?;
                }
            }
            return Ok(state);
        }

        let state = ConversationState::new(context_id, user_id.map(str::to_owned));
        self.storage.set(&state).await?;
        debug!(context_id, backend = self.backend(), "conversation state created");
        Ok(state)
    }

    /// Stores a modified state document.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn update_state(&self, state: &ConversationState) -> MemoryResult<()> {
        self.storage.set(state).await
    }

    async fn modify<F>(&self, context_id: &str, apply: F) -> MemoryResult<ConversationState>
    where
        F: FnOnce(&mut ConversationState) + Send,
    {
        let mut state = self.get_or_create(context_id, None).await?;
        apply(&mut state);
        self.storage.set(&state).await?;
        Ok(state)
    }

    /// Appends a history entry.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn add_to_history(
        &self,
        context_id: &str,
        role: TurnRole,
        content: impl Into<String> + Send,
        metadata: Map<String, Value>,
    ) -> MemoryResult<()> {
        let entry = HistoryEntry::new(role, content).with_metadata(metadata);
        self.modify(context_id, |state| state.push_history(entry))
            .await
            .map(|_| ())
    }

    /// Returns up to `limit` recent entries, oldest first. A missing context
    /// yields an empty history.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn get_history(
        &self,
        context_id: &str,
        limit: usize,
    ) -> MemoryResult<Vec<HistoryEntry>> {
        Ok(self
            .storage
            .get(context_id)
            .await?
            .map(|state| state.recent_history(limit))
            .unwrap_or_default())
    }

    /// Sets a conversation variable.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn set_variable(
        &self,
        context_id: &str,
        key: &str,
        value: Value,
    ) -> MemoryResult<()> {
        self.modify(context_id, |state| state.set_variable(key, value))
            .await
            .map(|_| ())
    }

    /// Reads a conversation variable.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn get_variable(&self, context_id: &str, key: &str) -> MemoryResult<Option<Value>> {
        Ok(self
            .storage
            .get(context_id)
            .await?
            .and_then(|state| state.variable(key).cloned()))
    }

    /// Increments an integer variable (missing or non-integer counts as 0)
    /// and returns the new value.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn increment_variable(&self, context_id: &str, key: &str) -> MemoryResult<i64> {
        let state = self
            .modify(context_id, |state| {
                let next = state.variable(key).and_then(Value::as_i64).unwrap_or(0) + 1;
                state.set_variable(key, Value::from(next));
            })
            .await?;
        Ok(state.variable(key).and_then(Value::as_i64).unwrap_or(0))
    }

    /// Sets a metadata entry.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn set_metadata(
        &self,
        context_id: &str,
        key: &str,
        value: Value,
    ) -> MemoryResult<()> {
        self.modify(context_id, |state| state.set_metadata(key, value))
            .await
            .map(|_| ())
    }

    /// Reads a metadata entry.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn get_metadata(&self, context_id: &str, key: &str) -> MemoryResult<Option<Value>> {
        Ok(self
            .storage
            .get(context_id)
            .await?
            .and_then(|state| state.metadata().get(key).cloned()))
    }

    /// Removes the conversation entirely.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn clear_context(&self, context_id: &str) -> MemoryResult<bool> {
        self.storage.delete(context_id).await
    }

    /// Lists conversations, optionally restricted to one user.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn list_contexts(&self, user_id: Option<&str>) -> MemoryResult<Vec<String>> {
        self.storage.list_contexts(user_id).await
    }

    /// Deletes conversations not updated within `max_age`. Returns the number
    /// removed.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn cleanup_old_contexts(&self, max_age: ChronoDuration) -> MemoryResult<usize> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;
        for context_id in self.storage.list_contexts(None).await? {
            let stale = self
                .storage
                .get(&context_id)
                .await?
                .is_some_and(|state| state.updated_at() < cutoff);
            if stale && self.storage.delete(&context_id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, backend = self.backend(), "expired conversation states removed");
        }
        Ok(removed)
    }

    /// Binds this context to one conversation.
    #[must_use]
    pub fn handle(&self, context_id: impl Into<String>) -> StateHandle {
        StateHandle {
            context: self.clone(),
            context_id: context_id.into(),
        }
    }
}

/// Conversation-bound view injected into stateful capabilities.
#[derive(Debug, Clone)]
pub struct StateHandle {
    context: ConversationContext,
    context_id: String,
}

impl StateHandle {
    /// Returns the bound conversation id.
    #[must_use]
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Returns the underlying context.
    #[must_use]
    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    /// Reads a variable of the bound conversation.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn get_variable(&self, key: &str) -> MemoryResult<Option<Value>> {
        self.context.get_variable(&self.context_id, key).await
    }

    /// Sets a variable of the bound conversation.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn set_variable(&self, key: &str, value: Value) -> MemoryResult<()> {
        self.context.set_variable(&self.context_id, key, value).await
    }

    /// Returns recent history of the bound conversation.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn history(&self, limit: usize) -> MemoryResult<Vec<HistoryEntry>> {
        self.context.get_history(&self.context_id, limit).await
    }
}
