//! Content-addressed response caching.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_memory::{KeyValueStore, MemoryError, MemoryResult};
use agent_primitives::CapabilityResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::interceptor::{Interceptor, Invocation, Next};

/// Returns the hex SHA-256 of `function:arguments`.
///
/// `serde_json` keeps object keys sorted, so equal arguments always hash
/// identically.
#[must_use]
pub fn cache_key(function: &str, arguments: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(function.as_bytes());
    hasher.update(b":");
    hasher.update(arguments.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Backend selection for cached layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    /// Bounded in-process map.
    #[default]
    Memory,
    /// Shared key-value store.
    #[serde(alias = "valkey", alias = "redis")]
    Kv,
}

/// Caching parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend used to store entries.
    pub backend: CacheKind,
    /// Entry lifetime in seconds.
    #[serde(alias = "ttl")]
    pub default_ttl: u64,
    /// Maximum entries for the memory backend.
    pub max_size: usize,
    /// Key prefix for the key-value backend.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheKind::Memory,
            default_ttl: 300,
            max_size: 1000,
            key_prefix: "agent:cache".into(),
        }
    }
}

impl CacheConfig {
    /// Returns the configured TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }
}

/// Entry counts reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently stored.
    pub total: usize,
    /// Stored entries past their TTL.
    pub expired: usize,
    /// Stored entries still valid.
    pub active: usize,
}

/// Storage used by [`CacheInterceptor`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns a live entry.
    async fn get(&self, key: &str) -> MemoryResult<Option<String>>;
    /// Stores an entry for `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> MemoryResult<()>;
    /// Removes an entry.
    async fn delete(&self, key: &str) -> MemoryResult<bool>;
    /// Removes every entry owned by this backend.
    async fn clear(&self) -> MemoryResult<()>;
    /// Reports entry counts.
    async fn stats(&self) -> MemoryResult<CacheStats>;
    /// Short backend label.
    fn backend(&self) -> &'static str;
}

#[derive(Debug)]
struct CachedValue {
    value: String,
    expires_at: Instant,
    sequence: u64,
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries: HashMap<String, CachedValue>,
    next_sequence: u64,
}

/// Bounded in-process cache evicting the oldest entry when full.
#[derive(Debug)]
pub struct MemoryCache {
    max_size: usize,
    inner: Mutex<MemoryCacheInner>,
}

impl MemoryCache {
    /// Creates a cache holding at most `max_size` entries (minimum one).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            inner: Mutex::new(MemoryCacheInner::default()),
        }
    }

    fn lock(&self) -> MemoryResult<std::sync::MutexGuard<'_, MemoryCacheInner>> {
        self.inner
            .lock()
            .map_err(|_| MemoryError::backend("memory cache poisoned"))
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> MemoryResult<Option<String>> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                inner.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> MemoryResult<()> {
        let now = Instant::now();
        let mut inner = self.lock()?;

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_size {
            inner.entries.retain(|_, entry| entry.expires_at > now);
            if inner.entries.len() >= self.max_size {
                let oldest = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.sequence)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    inner.entries.remove(&oldest);
                }
            }
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.entries.insert(
            key.to_owned(),
            CachedValue {
                value,
                expires_at: now + ttl,
                sequence,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> MemoryResult<bool> {
        Ok(self.lock()?.entries.remove(key).is_some())
    }

    async fn clear(&self) -> MemoryResult<()> {
        self.lock()?.entries.clear();
        Ok(())
    }

    async fn stats(&self) -> MemoryResult<CacheStats> {
        let now = Instant::now();
        let inner = self.lock()?;
        let total = inner.entries.len();
        let expired = inner
            .entries
            .values()
            .filter(|entry| entry.expires_at <= now)
            .count();
        Ok(CacheStats {
            total,
            expired,
            active: total - expired,
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Cache stored in a shared [`KeyValueStore`] under `prefix:key`.
pub struct KeyValueCache {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl fmt::Debug for KeyValueCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValueCache")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl KeyValueCache {
    /// Wraps `store`, namespacing keys under `prefix`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

#[async_trait]
impl CacheBackend for KeyValueCache {
    async fn get(&self, key: &str) -> MemoryResult<Option<String>> {
        self.store.get(&self.key(key)).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> MemoryResult<()> {
        self.store.set(&self.key(key), value, Some(ttl)).await
    }

    async fn delete(&self, key: &str) -> MemoryResult<bool> {
        self.store.delete(&self.key(key)).await
    }

    async fn clear(&self) -> MemoryResult<()> {
        for key in self.store.keys(&self.key("")).await? {
            self.store.delete(&key).await?;
        }
        Ok(())
    }

    async fn stats(&self) -> MemoryResult<CacheStats> {
        let total = self.store.keys(&self.key("")).await?.len();
        Ok(CacheStats {
            total,
            expired: 0,
            active: total,
        })
    }

    fn backend(&self) -> &'static str {
        "kv"
    }
}

/// Interceptor memoising successful results.
///
/// The wrapped executor is treated as referentially transparent: equal
/// function name and arguments within the TTL return the stored result.
/// Errors are never cached, and backend failures fall through to the
/// wrapped executor.
pub struct CacheInterceptor {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl fmt::Debug for CacheInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheInterceptor")
            .field("backend", &self.backend.backend())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl CacheInterceptor {
    /// Creates an interceptor storing results in `backend` for `ttl`.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    fn name(&self) -> &'static str {
        "cached"
    }

    async fn invoke(&self, invocation: Invocation, next: Next<'_>) -> CapabilityResult<String> {
        let key = cache_key(invocation.function(), invocation.arguments());
        let function = invocation.function().to_owned();

        match self.backend.get(&key).await {
            Ok(Some(hit)) => {
                debug!(function = %function, "cache hit");
                return Ok(hit);
            }
            Ok(None) => debug!(function = %function, "cache miss"),
            Err(err) => warn!(function = %function, %err, "cache lookup failed"),
        }

        let result = next.run(invocation).await?;
        if let Err(err) = self.backend.set(&key, result.clone(), self.ttl).await {
            warn!(function = %function, %err, "cache store failed");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agent_memory::InMemoryKeyValueStore;
    use agent_primitives::{CapabilityError, Task};
    use serde_json::json;

    use super::*;
    use crate::interceptor::Handler;
    use crate::pipeline::Pipeline;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Handler for Counting {
        async fn handle(&self, invocation: Invocation) -> CapabilityResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CapabilityError::execution("boom"));
            }
            Ok(format!("result for {}", invocation.arguments()))
        }
    }

    fn cached(backend: Arc<dyn CacheBackend>, handler: Arc<Counting>) -> Pipeline {
        Pipeline::builder(handler)
            .layer(Arc::new(CacheInterceptor::new(backend, Duration::from_secs(300))))
            .build()
    }

    fn call(arguments: Value) -> Invocation {
        Invocation::new("forecast", Arc::new(Task::new("t"))).with_arguments(arguments)
    }

    #[tokio::test(start_paused = true)]
    async fn identical_calls_within_ttl_execute_once() {
        let handler = Arc::new(Counting::default());
        let pipeline = cached(Arc::new(MemoryCache::new(10)), handler.clone());

        let first = pipeline.run(call(json!({"city": "Oslo"}))).await.unwrap();
        let second = pipeline.run(call(json!({"city": "Oslo"}))).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        pipeline.run(call(json!({"city": "Rome"}))).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(301)).await;
        pipeline.run(call(json!({"city": "Oslo"}))).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let handler = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let pipeline = cached(Arc::new(MemoryCache::new(10)), handler.clone());
        assert!(pipeline.run(call(json!(1))).await.is_err());
        assert!(pipeline.run(call(json!(1))).await.is_err());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn memory_cache_evicts_oldest_entry() {
        let cache = MemoryCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.set("a", "1".into(), ttl).await.unwrap();
        cache.set("b", "2".into(), ttl).await.unwrap();
        cache.set("c", "3".into(), ttl).await.unwrap();

        assert!(cache.get("a").await.unwrap().is_none());
        assert_eq!(cache.get("c").await.unwrap().as_deref(), Some("3"));
        assert_eq!(cache.stats().await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn key_value_cache_uses_prefix() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let handler = Arc::new(Counting::default());
        let pipeline = cached(
            Arc::new(KeyValueCache::new(store.clone(), "test:cache")),
            handler.clone(),
        );
        pipeline.run(call(json!({"q": 1}))).await.unwrap();
        pipeline.run(call(json!({"q": 1}))).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        let expected = format!("test:cache:{}", cache_key("forecast", &json!({"q": 1})));
        assert!(store.get(&expected).await.unwrap().is_some());
    }

    #[test]
    fn cache_key_is_stable_hex() {
        let left = cache_key("f", &json!({"b": 1, "a": 2}));
        let right = cache_key("f", &json!({"a": 2, "b": 1}));
        assert_eq!(left, right);
        assert_eq!(left.len(), 64);
        assert_ne!(left, cache_key("g", &json!({"a": 2, "b": 1})));
    }
}
