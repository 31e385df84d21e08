//! Cross-cutting behaviour layered around capability executors.
//!
//! A [`Pipeline`] runs an ordered list of [`Interceptor`]s around a terminal
//! [`Handler`]. The first interceptor in the list is the outermost one: it
//! observes the full duration and result of everything nested inside it.

#![warn(missing_docs, clippy::pedantic)]

mod cache;
mod interceptor;
mod pipeline;
mod rate_limit;
mod resources;
mod retry;
mod spec;
mod timing;

pub use cache::{
    CacheBackend, CacheConfig, CacheInterceptor, CacheKind, CacheStats, KeyValueCache, MemoryCache,
    cache_key,
};
pub use interceptor::{Handler, Interceptor, Invocation, Next};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use rate_limit::{
    EnforcementMode, KeyStrategy, RateLimitConfig, RateLimitInterceptor, TokenBucketLimiter,
};
pub use resources::{MiddlewareResources, RateLimitStats};
pub use retry::{RetryConfig, RetryInterceptor};
pub use spec::MiddlewareSpec;
pub use timing::TimingInterceptor;
