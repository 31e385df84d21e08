//! Execution timing.

use agent_primitives::CapabilityResult;
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::interceptor::{Interceptor, Invocation, Next};

/// Interceptor logging how long the inner layers took.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingInterceptor;

impl TimingInterceptor {
    /// Creates a timing layer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Interceptor for TimingInterceptor {
    fn name(&self) -> &'static str {
        "timed"
    }

    async fn invoke(&self, invocation: Invocation, next: Next<'_>) -> CapabilityResult<String> {
        let function = invocation.function().to_owned();
        let started = Instant::now();
        let result = next.run(invocation).await;
        let elapsed_secs = started.elapsed().as_secs_f64();

        match &result {
            Ok(_) => info!(function = %function, elapsed_secs, "capability executed"),
            Err(err) => warn!(function = %function, elapsed_secs, %err, "capability failed"),
        }
        result
    }
}
