//! Key-value contract shared by state storage and response caching.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{MemoryError, MemoryResult};

/// Minimal TTL-aware key-value backend.
///
/// Networked stores (Redis, Valkey, ...) implement this trait out of tree;
/// [`InMemoryKeyValueStore`] is the in-process implementation.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if present and unexpired.
    async fn get(&self, key: &str) -> MemoryResult<Option<String>>;

    /// Stores `value` under `key`, expiring after `ttl` when supplied.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> MemoryResult<()>;

    /// Removes `key`, returning whether it existed.
    async fn delete(&self, key: &str) -> MemoryResult<bool>;

    /// Lists live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> MemoryResult<Vec<String>>;
}

#[derive(Debug)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// In-process [`KeyValueStore`] with lazy expiry.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl InMemoryKeyValueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MemoryResult<std::sync::MutexGuard<'_, HashMap<String, Slot>>> {
        self.slots
            .lock()
            .map_err(|_| MemoryError::backend("key-value store poisoned"))
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> MemoryResult<Option<String>> {
        let now = Instant::now();
        let mut slots = self.lock()?;
        match slots.get(key) {
            Some(slot) if slot.is_live(now) => Ok(Some(slot.value.clone())),
            Some(_) => {
                slots.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> MemoryResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock()?.insert(key.to_owned(), Slot { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> MemoryResult<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> MemoryResult<Vec<String>> {
        let now = Instant::now();
        let mut slots = self.lock()?;
        slots.retain(|_, slot| slot.is_live(now));
        let mut keys: Vec<String> = slots
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = InMemoryKeyValueStore::new();
        store
            .set("state:a", "one".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        store.set("state:b", "two".into(), None).await.unwrap();
        store.set("other", "three".into(), None).await.unwrap();

        assert_eq!(store.get("state:a").await.unwrap().as_deref(), Some("one"));
        assert_eq!(store.keys("state:").await.unwrap(), ["state:a", "state:b"]);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("state:a").await.unwrap().is_none());
        assert_eq!(store.keys("state:").await.unwrap(), ["state:b"]);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = InMemoryKeyValueStore::new();
        store.set("k", "v".into(), None).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }
}
