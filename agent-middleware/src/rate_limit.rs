//! Token-bucket rate limiting.
//!
//! Buckets refill lazily: every check computes the tokens earned since the
//! previous one from monotonic time, so no background task is needed.
//! A new bucket starts full at its capacity, so a bucket that has refilled
//! completely carries no state and is dropped by the next periodic sweep.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_primitives::{CapabilityError, CapabilityResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::cache_key;
use crate::interceptor::{Interceptor, Invocation, Next};

/// How the bucket key is derived from an invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// One bucket per function.
    #[default]
    FunctionName,
    /// One bucket per function and argument hash.
    FunctionArgs,
    /// One bucket per function and calling user.
    FunctionUser,
}

/// What happens when a bucket is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Reject with [`CapabilityError::RateLimitExceeded`].
    #[default]
    Strict,
    /// Allow the call and emit a warning.
    Soft,
    /// Allow the call and emit an informational log.
    LogOnly,
}

/// Rate limiting parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per minute per bucket.
    pub requests_per_minute: u32,
    /// Bucket capacity; defaults to `requests_per_minute`.
    pub burst_size: Option<u32>,
    /// Bucket key derivation.
    pub key_strategy: KeyStrategy,
    /// Behaviour when a bucket is empty.
    pub enforcement: EnforcementMode,
    /// Keys (or function names) that bypass limiting.
    pub whitelist: BTreeSet<String>,
    /// Per-function overrides of `requests_per_minute`.
    pub custom_limits: HashMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: None,
            key_strategy: KeyStrategy::FunctionName,
            enforcement: EnforcementMode::Strict,
            whitelist: BTreeSet::new(),
            custom_limits: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// Convenience constructor with the default strategy and strict mode.
    #[must_use]
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            ..Self::default()
        }
    }

    fn limit_for(&self, function: &str) -> u32 {
        self.custom_limits
            .get(function)
            .copied()
            .unwrap_or(self.requests_per_minute)
    }
}

/// Minimum time between sweeps of refilled buckets.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    full_at: Instant,
}

#[derive(Debug, Default)]
struct Buckets {
    entries: HashMap<String, Bucket>,
    last_sweep: Option<Instant>,
}

impl Buckets {
    fn sweep(&mut self, now: Instant) {
        if self
            .last_sweep
            .is_some_and(|last| now.saturating_duration_since(last) < SWEEP_INTERVAL)
        {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, bucket| bucket.full_at > now);
        self.last_sweep = Some(now);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "idle rate-limit buckets evicted");
        }
    }
}

/// Shared set of token buckets keyed by string.
#[derive(Debug, Default)]
pub struct TokenBucketLimiter {
    buckets: Mutex<Buckets>,
}

impl TokenBucketLimiter {
    /// Creates an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes one token from `key`'s bucket, refilling it first at
    /// `requests_per_minute / 60` tokens per second up to `capacity`.
    ///
    /// Returns false when fewer than one token is available. A zero rate
    /// denies every call.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn try_acquire(&self, key: &str, requests_per_minute: u32, capacity: u32) -> bool {
        if requests_per_minute == 0 || capacity == 0 {
            return false;
        }
        let capacity = f64::from(capacity);
        let rate_per_second = f64::from(requests_per_minute) / 60.0;
        let now = Instant::now();

        let mut buckets = self.buckets.lock().expect("rate limiter poisoned");
        buckets.sweep(now);
        let bucket = buckets.entries.entry(key.to_owned()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
            full_at: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate_per_second).min(capacity);
        bucket.last_refill = now;

        let acquired = bucket.tokens >= 1.0;
        if acquired {
            bucket.tokens -= 1.0;
        }
        let deficit = capacity - bucket.tokens;
        bucket.full_at = now + Duration::from_secs_f64(deficit / rate_per_second);
        acquired
    }

    /// Number of live buckets.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().expect("rate limiter poisoned").entries.len()
    }

    /// Drops every bucket so the next call on each key starts full.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn reset(&self) {
        let mut buckets = self.buckets.lock().expect("rate limiter poisoned");
        buckets.entries.clear();
        buckets.last_sweep = None;
    }
}

/// Interceptor enforcing a [`RateLimitConfig`].
#[derive(Debug)]
pub struct RateLimitInterceptor {
    config: RateLimitConfig,
    limiter: Arc<TokenBucketLimiter>,
}

impl RateLimitInterceptor {
    /// Creates an interceptor drawing from `limiter`.
    #[must_use]
    pub fn new(config: RateLimitConfig, limiter: Arc<TokenBucketLimiter>) -> Self {
        Self { config, limiter }
    }

    fn bucket_key(&self, invocation: &Invocation) -> String {
        let function = invocation.function();
        match self.config.key_strategy {
            KeyStrategy::FunctionName => function.to_owned(),
            KeyStrategy::FunctionArgs => {
                format!("{function}:{}", cache_key(function, invocation.arguments()))
            }
            KeyStrategy::FunctionUser => match invocation.user_id() {
                Some(user) => format!("{function}:user:{user}"),
                None => format!("{function}:user:anonymous"),
            },
        }
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &'static str {
        "rate_limited"
    }

    async fn invoke(&self, invocation: Invocation, next: Next<'_>) -> CapabilityResult<String> {
        let function = invocation.function();
        let key = self.bucket_key(&invocation);
        let exempt =
            self.config.whitelist.contains(&key) || self.config.whitelist.contains(function);

        if !exempt {
            let rpm = self.config.limit_for(function);
            let capacity = self.config.burst_size.unwrap_or(rpm);
            if !self.limiter.try_acquire(&key, rpm, capacity) {
                match self.config.enforcement {
                    EnforcementMode::Strict => {
                        warn!(function, key = %key, rpm, "rate limit exceeded");
                        return Err(CapabilityError::RateLimitExceeded { key });
                    }
                    EnforcementMode::Soft => {
                        warn!(function, key = %key, rpm, "rate limit exceeded (soft limit)");
                    }
                    EnforcementMode::LogOnly => {
                        info!(function, key = %key, rpm, "rate limit exceeded (log only)");
                    }
                }
            }
        }

        next.run(invocation).await
    }
}
