//! Shared state behind middleware layers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use agent_memory::{KeyValueStore, MemoryResult};
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{
    CacheBackend, CacheConfig, CacheInterceptor, CacheKind, CacheStats, KeyValueCache, MemoryCache,
};
use crate::interceptor::Interceptor;
use crate::rate_limit::{KeyStrategy, RateLimitConfig, RateLimitInterceptor, TokenBucketLimiter};
use crate::retry::RetryInterceptor;
use crate::spec::MiddlewareSpec;
use crate::timing::TimingInterceptor;

/// Active rate-limit state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    /// Distinct limiters, one per `(strategy, rpm)` pair.
    pub limiters: usize,
    /// Buckets across every limiter.
    pub active_buckets: usize,
}

/// Owner of limiters and caches used by middleware layers.
///
/// Rate limiters are shared between layers declaring the same key strategy
/// and rate, so two capabilities limited "per function name at 60 rpm" draw
/// from one limiter with separate buckets. Caches are shared the same way per
/// backend shape; entries are keyed by function name, so capabilities never
/// read each other's results. Rebuilding a pipeline therefore reuses its
/// cache instead of tracking another one.
#[derive(Default)]
pub struct MiddlewareResources {
    limiters: Mutex<HashMap<(KeyStrategy, u32), Arc<TokenBucketLimiter>>>,
    caches: Mutex<HashMap<CacheShape, Arc<dyn CacheBackend>>>,
    kv_store: Option<Arc<dyn KeyValueStore>>,
}

/// Identity of a shared cache backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheShape {
    Memory(usize),
    Kv(String),
}

impl fmt::Debug for MiddlewareResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareResources")
            .field("rate_limits", &self.rate_limit_stats())
            .field("kv_store", &self.kv_store.is_some())
            .finish_non_exhaustive()
    }
}

impl MiddlewareResources {
    /// Creates resources without a key-value store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `store` for caches configured with [`CacheKind::Kv`].
    #[must_use]
    pub fn with_kv_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.kv_store = Some(store);
        self
    }

    /// Builds the interceptor for one declaration.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    #[must_use]
    pub fn build(&self, spec: &MiddlewareSpec) -> Arc<dyn Interceptor> {
        match spec {
            MiddlewareSpec::RateLimited(config) => {
                let limiter = self.limiter_for(config);
                Arc::new(RateLimitInterceptor::new(config.clone(), limiter))
            }
            MiddlewareSpec::Cached(config) => {
                let backend = self.cache_for(config);
                Arc::new(CacheInterceptor::new(backend, config.ttl()))
            }
            MiddlewareSpec::Retryable(config) => Arc::new(RetryInterceptor::new(config.clone())),
            MiddlewareSpec::Timed => Arc::new(TimingInterceptor::new()),
        }
    }

    /// Builds interceptors for a stack, preserving declaration order.
    #[must_use]
    pub fn build_stack(&self, specs: &[MiddlewareSpec]) -> Vec<Arc<dyn Interceptor>> {
        specs.iter().map(|spec| self.build(spec)).collect()
    }

    fn limiter_for(&self, config: &RateLimitConfig) -> Arc<TokenBucketLimiter> {
        let key = (config.key_strategy, config.requests_per_minute);
        let mut limiters = self.limiters.lock().expect("limiter map poisoned");
        Arc::clone(limiters.entry(key).or_default())
    }

    fn cache_for(&self, config: &CacheConfig) -> Arc<dyn CacheBackend> {
        let store = match (config.backend, &self.kv_store) {
            (CacheKind::Kv, Some(store)) => Some(store),
            (CacheKind::Kv, None) => {
                warn!("key-value cache requested without a store; using memory cache");
                None
            }
            (CacheKind::Memory, _) => None,
        };
        let shape = match store {
            Some(_) => CacheShape::Kv(config.key_prefix.clone()),
            None => CacheShape::Memory(config.max_size),
        };
        let mut caches = self.caches.lock().expect("cache map poisoned");
        let backend = caches.entry(shape).or_insert_with(|| {
            let backend: Arc<dyn CacheBackend> = match store {
                Some(store) => {
                    Arc::new(KeyValueCache::new(Arc::clone(store), config.key_prefix.clone()))
                }
                None => Arc::new(MemoryCache::new(config.max_size)),
            };
            backend
        });
        Arc::clone(backend)
    }

    /// Drops every rate-limit bucket.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub fn reset_rate_limits(&self) {
        let limiters = self.limiters.lock().expect("limiter map poisoned");
        for limiter in limiters.values() {
            limiter.reset();
        }
        info!(limiters = limiters.len(), "rate limits reset");
    }

    /// Reports limiter and bucket counts.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    #[must_use]
    pub fn rate_limit_stats(&self) -> RateLimitStats {
        let limiters = self.limiters.lock().expect("limiter map poisoned");
        RateLimitStats {
            limiters: limiters.len(),
            active_buckets: limiters.values().map(|limiter| limiter.bucket_count()).sum(),
        }
    }

    fn cache_snapshot(&self) -> Vec<Arc<dyn CacheBackend>> {
        self.caches
            .lock()
            .expect("cache map poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Empties every tracked cache and returns how many were cleared.
    ///
    /// # Errors
    ///
    /// Returns the first backend failure.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub async fn clear_caches(&self) -> MemoryResult<usize> {
        let caches = self.cache_snapshot();
        for cache in &caches {
            cache.clear().await?;
        }
        info!(caches = caches.len(), "caches cleared");
        Ok(caches.len())
    }

    /// Sums entry counts across every tracked cache.
    ///
    /// # Errors
    ///
    /// Returns the first backend failure.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub async fn cache_stats(&self) -> MemoryResult<CacheStats> {
        let mut total = CacheStats::default();
        for cache in self.cache_snapshot() {
            let stats = cache.stats().await?;
            total.total += stats.total;
            total.expired += stats.expired;
            total.active += stats.active;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agent_memory::InMemoryKeyValueStore;
    use agent_primitives::{CapabilityResult, Task};
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::interceptor::{Handler, Invocation};
    use crate::pipeline::Pipeline;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl Handler for Counter {
        async fn handle(&self, _invocation: Invocation) -> CapabilityResult<String> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst).to_string())
        }
    }

    fn call(function: &str) -> Invocation {
        Invocation::new(function, Arc::new(Task::new("t"))).with_arguments(json!({"x": 1}))
    }

    #[tokio::test(start_paused = true)]
    async fn limiters_are_shared_per_strategy_and_rate() {
        let resources = MiddlewareResources::new();
        let spec = MiddlewareSpec::RateLimited(RateLimitConfig::per_minute(1));
        let first = Pipeline::builder(Arc::new(Counter::default()))
            .layer(resources.build(&spec))
            .build();
        let second = Pipeline::builder(Arc::new(Counter::default()))
            .layer(resources.build(&spec))
            .build();

        first.run(call("shared")).await.unwrap();
        assert!(second.run(call("shared")).await.is_err());
        assert_eq!(
            resources.rate_limit_stats(),
            RateLimitStats {
                limiters: 1,
                active_buckets: 1
            }
        );

        resources.reset_rate_limits();
        assert!(second.run(call("shared")).await.is_ok());
    }

    #[tokio::test]
    async fn caches_are_tracked_and_cleared() {
        let resources =
            MiddlewareResources::new().with_kv_store(Arc::new(InMemoryKeyValueStore::new()));
        let counter = Arc::new(Counter::default());
        let pipeline = Pipeline::builder(counter.clone())
            .layers(resources.build_stack(&[
                MiddlewareSpec::Timed,
                MiddlewareSpec::Cached(CacheConfig::default()),
                MiddlewareSpec::Cached(CacheConfig {
                    backend: CacheKind::Kv,
                    ..CacheConfig::default()
                }),
            ]))
            .build();
        assert_eq!(pipeline.interceptor_names(), ["timed", "cached", "cached"]);

        pipeline.run(call("f")).await.unwrap();
        pipeline.run(call("f")).await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(resources.cache_stats().await.unwrap().active, 2);

        assert_eq!(resources.clear_caches().await.unwrap(), 2);
        assert_eq!(resources.cache_stats().await.unwrap().total, 0);
        pipeline.run(call("f")).await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rebuilt_stacks_reuse_their_cache() {
        let resources = MiddlewareResources::new();
        let specs = [MiddlewareSpec::Cached(CacheConfig::default())];
        for _ in 0..5 {
            let _ = resources.build_stack(&specs);
        }
        let counter = Arc::new(Counter::default());
        let pipeline = Pipeline::builder(counter.clone())
            .layers(resources.build_stack(&specs))
            .build();
        pipeline.run(call("f")).await.unwrap();

        assert_eq!(resources.clear_caches().await.unwrap(), 1);

        let small = MiddlewareSpec::Cached(CacheConfig {
            max_size: 10,
            ..CacheConfig::default()
        });
        let _ = resources.build(&small);
        assert_eq!(resources.clear_caches().await.unwrap(), 2);
    }
}
