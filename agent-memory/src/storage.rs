//! Storage backends for [`ConversationState`] documents.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::kv::KeyValueStore;
use crate::state::ConversationState;
use crate::{MemoryError, MemoryResult};

/// Backend persisting conversation state documents.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Loads the state for `context_id`.
    async fn get(&self, context_id: &str) -> MemoryResult<Option<ConversationState>>;

    /// Stores `state`, replacing any previous version.
    async fn set(&self, state: &ConversationState) -> MemoryResult<()>;

    /// Removes the state for `context_id`, returning whether it existed.
    async fn delete(&self, context_id: &str) -> MemoryResult<bool>;

    /// Lists stored context ids, optionally restricted to one user.
    async fn list_contexts(&self, user_id: Option<&str>) -> MemoryResult<Vec<String>>;

    /// Short backend label used in logs and introspection.
    fn backend(&self) -> &'static str;
}

/// In-process storage guarded by a single async mutex so get, set, and
/// delete are atomic relative to one another.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    states: Mutex<HashMap<String, ConversationState>>,
}

impl InMemoryStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStorage for InMemoryStorage {
    async fn get(&self, context_id: &str) -> MemoryResult<Option<ConversationState>> {
        Ok(self.states.lock().await.get(context_id).cloned())
    }

    async fn set(&self, state: &ConversationState) -> MemoryResult<()> {
        self.states
            .lock()
            .await
            .insert(state.context_id().to_owned(), state.clone());
        Ok(())
    }

    async fn delete(&self, context_id: &str) -> MemoryResult<bool> {
        Ok(self.states.lock().await.remove(context_id).is_some())
    }

    async fn list_contexts(&self, user_id: Option<&str>) -> MemoryResult<Vec<String>> {
        let states = self.states.lock().await;
        let mut ids: Vec<String> = states
            .values()
            .filter(|state| user_id.is_none() || state.user_id() == user_id)
            .map(|state| state.context_id().to_owned())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Storage writing one JSON document per conversation under a directory.
pub struct FileStorage {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStorage")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl FileStorage {
    /// Default directory used when configuration does not name one.
    pub const DEFAULT_DIR: &'static str = "./conversation_states";

    /// Opens (or creates) the storage directory.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors encountered while creating the directory.
    pub async fn open(dir: impl Into<PathBuf>) -> MemoryResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, context_id: &str) -> MemoryResult<PathBuf> {
        if context_id.is_empty() || context_id.len() > 200 || context_id.starts_with('.') {
            return Err(MemoryError::InvalidContextId {
                id: context_id.into(),
            });
        }
        let file_stem: String = context_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Ok(self.dir.join(format!("{file_stem}.json")))
    }
}

#[async_trait]
impl StateStorage for FileStorage {
    async fn get(&self, context_id: &str) -> MemoryResult<Option<ConversationState>> {
        let path = self.path_for(context_id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, state: &ConversationState) -> MemoryResult<()> {
        let path = self.path_for(state.context_id())?;
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = path.with_extension("json.tmp");

        let _guard = self.write_lock.lock().await;
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;
        debug!(context_id = state.context_id(), path = %path.display(), "state persisted");
        Ok(())
    }

    async fn delete(&self, context_id: &str) -> MemoryResult<bool> {
        let path = self.path_for(context_id)?;
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_contexts(&self, user_id: Option<&str>) -> MemoryResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<ConversationState>(&bytes) {
                Ok(state) if user_id.is_none() || state.user_id() == user_id => {
                    ids.push(state.context_id().to_owned());
                }
                Ok(_) => {}
                Err(err) => warn!(path = %path.display(), %err, "skipping unreadable state file"),
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

/// Storage delegating to a [`KeyValueStore`], typically a networked TTL store.
pub struct KeyValueStorage {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
    ttl: Option<Duration>,
}

impl fmt::Debug for KeyValueStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValueStorage")
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl KeyValueStorage {
    /// Default key prefix for conversation documents.
    pub const DEFAULT_PREFIX: &'static str = "agent:state:";
    /// Default document lifetime.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    /// Wraps `store` using the default prefix and TTL.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            key_prefix: Self::DEFAULT_PREFIX.into(),
            ttl: Some(Self::DEFAULT_TTL),
        }
    }

    /// Overrides the key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Overrides the TTL; `None` keeps documents until deleted.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(&self, context_id: &str) -> String {
        format!("{}{context_id}", self.key_prefix)
    }
}

#[async_trait]
impl StateStorage for KeyValueStorage {
    async fn get(&self, context_id: &str) -> MemoryResult<Option<ConversationState>> {
        match self.store.get(&self.key(context_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, state: &ConversationState) -> MemoryResult<()> {
        let raw = serde_json::to_string(state)?;
        self.store
            .set(&self.key(state.context_id()), raw, self.ttl)
            .await
    }

    async fn delete(&self, context_id: &str) -> MemoryResult<bool> {
        self.store.delete(&self.key(context_id)).await
    }

    async fn list_contexts(&self, user_id: Option<&str>) -> MemoryResult<Vec<String>> {
        let mut ids = Vec::new();
        for key in self.store.keys(&self.key_prefix).await? {
            let Some(context_id) = key.strip_prefix(&self.key_prefix) else {
                continue;
            };
            if let Some(user_id) = user_id {
                match self.get(context_id).await? {
                    Some(state) if state.user_id() == Some(user_id) => {}
                    _ => continue,
                }
            }
            ids.push(context_id.to_owned());
        }
        Ok(ids)
    }

    fn backend(&self) -> &'static str {
        "kv"
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::kv::InMemoryKeyValueStore;
    use crate::state::{HistoryEntry, TurnRole};

    fn sample(context_id: &str, user: &str) -> ConversationState {
        let mut state = ConversationState::new(context_id, Some(user.into()));
        state.set_variable("ai_conversation_count", json!(2));
        state.push_history(HistoryEntry::new(TurnRole::User, "hello"));
        state
    }

    async fn exercise(storage: &dyn StateStorage) {
        storage.set(&sample("ctx-1", "alice")).await.unwrap();
        storage.set(&sample("ctx-2", "bob")).await.unwrap();

        let loaded = storage.get("ctx-1").await.unwrap().expect("stored state");
        assert_eq!(loaded.variable("ai_conversation_count"), Some(&json!(2)));
        assert_eq!(loaded.history().len(), 1);

        assert_eq!(storage.list_contexts(None).await.unwrap(), ["ctx-1", "ctx-2"]);
        assert_eq!(storage.list_contexts(Some("bob")).await.unwrap(), ["ctx-2"]);

        assert!(storage.delete("ctx-1").await.unwrap());
        assert!(!storage.delete("ctx-1").await.unwrap());
        assert!(storage.get("ctx-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_memory_storage_contract() {
        exercise(&InMemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn file_storage_contract() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("state")).await.unwrap();
        exercise(&storage).await;
    }

    #[tokio::test]
    async fn key_value_storage_contract() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let storage = KeyValueStorage::new(store.clone()).with_prefix("test:state:");
        exercise(&storage).await;
        storage.set(&sample("ctx-3", "carol")).await.unwrap();
        assert!(store.get("test:state:ctx-3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn file_storage_rejects_hidden_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let err = storage.get("../escape").await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidContextId { .. }));
    }
}
