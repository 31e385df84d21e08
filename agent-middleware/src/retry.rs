//! Exponential-backoff retry.

use std::time::Duration;

use agent_primitives::{CapabilityError, CapabilityResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::interceptor::{Interceptor, Invocation, Next};

/// Retry parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt, in seconds.
    #[serde(alias = "initial_delay")]
    pub backoff_factor: f64,
    /// Upper bound on any single delay, in seconds.
    pub max_delay: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_factor: 1.0,
            max_delay: 60.0,
        }
    }
}

impl RetryConfig {
    /// Delay after failed attempt number `attempt` (1-based):
    /// `min(backoff_factor * 2^(attempt - 1), max_delay)`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let seconds = (self.backoff_factor * 2f64.powi(exponent)).min(self.max_delay);
        if seconds.is_finite() && seconds > 0.0 {
            Duration::from_secs_f64(seconds)
        } else {
            Duration::ZERO
        }
    }
}

fn is_retryable(err: &CapabilityError) -> bool {
    !matches!(
        err,
        CapabilityError::PermissionDenied { .. } | CapabilityError::Cancelled
    )
}

/// Interceptor re-running the inner layers after transient failures.
#[derive(Debug, Clone)]
pub struct RetryInterceptor {
    config: RetryConfig,
}

impl RetryInterceptor {
    /// Creates a retry layer.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    fn name(&self) -> &'static str {
        "retryable"
    }

    async fn invoke(&self, invocation: Invocation, next: Next<'_>) -> CapabilityResult<String> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match next.run(invocation.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if !is_retryable(&err) => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    error!(
                        function = invocation.function(),
                        attempts = max_attempts,
                        %err,
                        "all retry attempts failed"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.config.delay(attempt);
                    warn!(
                        function = invocation.function(),
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        %err,
                        "attempt {attempt} failed, retrying in {:.2}s",
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use agent_primitives::Task;

    use super::*;
    use crate::interceptor::Handler;
    use crate::pipeline::Pipeline;

    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        error: CapabilityError,
    }

    #[async_trait]
    impl Handler for Flaky {
        async fn handle(&self, _invocation: Invocation) -> CapabilityResult<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(format!("ok after {call}"))
            }
        }
    }

    fn retrying(failures: u32, error: CapabilityError) -> (Pipeline, Arc<Flaky>) {
        let handler = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            failures,
            error,
        });
        let pipeline = Pipeline::builder(handler.clone())
            .layer(Arc::new(RetryInterceptor::new(RetryConfig::default())))
            .build();
        (pipeline, handler)
    }

    fn call() -> Invocation {
        Invocation::new("fetch", Arc::new(Task::new("t")))
    }

    #[test]
    fn delay_doubles_up_to_cap() {
        let config = RetryConfig {
            max_attempts: 10,
            backoff_factor: 1.0,
            max_delay: 5.0,
        };
        assert_eq!(config.delay(1), Duration::from_secs(1));
        assert_eq!(config.delay(2), Duration::from_secs(2));
        assert_eq!(config.delay(3), Duration::from_secs(4));
        assert_eq!(config.delay(4), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (pipeline, handler) = retrying(2, CapabilityError::execution("flaky"));
        let result = pipeline.run(call()).await.unwrap();
        assert_eq!(result, "ok after 3");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn last_error_is_raised_after_exhaustion() {
        let (pipeline, handler) = retrying(10, CapabilityError::execution("down"));
        let err = pipeline.run(call()).await.unwrap_err();
        assert_eq!(err, CapabilityError::execution("down"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_is_not_retried() {
        let denied = CapabilityError::PermissionDenied {
            subject: "alice".into(),
            missing: vec!["admin".into()],
        };
        let (pipeline, handler) = retrying(10, denied);
        let err = pipeline.run(call()).await.unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
