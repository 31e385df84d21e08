//! Interceptor and handler traits plus the invocation they share.

use std::fmt;
use std::sync::Arc;

use agent_memory::StateHandle;
use agent_primitives::{CapabilityResult, Task};
use async_trait::async_trait;
use serde_json::Value;

/// One call travelling through a [`crate::Pipeline`].
#[derive(Clone)]
pub struct Invocation {
    function: String,
    task: Arc<Task>,
    arguments: Value,
    user_id: Option<String>,
    state: Option<StateHandle>,
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("function", &self.function)
            .field("task_id", &self.task.id())
            .field("user_id", &self.user_id)
            .field("stateful", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

impl Invocation {
    /// Creates an invocation of `function` for `task` with null arguments.
    #[must_use]
    pub fn new(function: impl Into<String>, task: Arc<Task>) -> Self {
        Self {
            function: function.into(),
            task,
            arguments: Value::Null,
            user_id: None,
            state: None,
        }
    }

    /// Sets the arguments used for cache and rate-limit keys.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    /// Records the calling user.
    #[must_use]
    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Attaches conversation state.
    #[must_use]
    pub fn with_state(mut self, state: StateHandle) -> Self {
        self.state = Some(state);
        self
    }

    /// Returns the function (capability) name.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Returns the task being processed.
    #[must_use]
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Returns the call arguments.
    #[must_use]
    pub fn arguments(&self) -> &Value {
        &self.arguments
    }

    /// Returns the calling user, if authenticated.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Returns the attached conversation state.
    #[must_use]
    pub fn state(&self) -> Option<&StateHandle> {
        self.state.as_ref()
    }
}

/// Terminal step of a pipeline, usually the guarded capability executor.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Produces the result for `invocation`.
    async fn handle(&self, invocation: Invocation) -> CapabilityResult<String>;
}

/// Cross-cutting step wrapped around the rest of a pipeline.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Short label used in logs and introspection.
    fn name(&self) -> &'static str;

    /// Handles `invocation`, delegating to `next` zero or more times.
    async fn invoke(&self, invocation: Invocation, next: Next<'_>) -> CapabilityResult<String>;
}

/// Remainder of a pipeline as seen from one interceptor.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(rest: &'a [Arc<dyn Interceptor>], handler: &'a dyn Handler) -> Self {
        Self { rest, handler }
    }

    /// Runs the remaining interceptors and the terminal handler.
    ///
    /// # Errors
    ///
    /// Propagates whatever the inner layers return.
    pub async fn run(self, invocation: Invocation) -> CapabilityResult<String> {
        match self.rest.split_first() {
            Some((head, tail)) => head.invoke(invocation, Next::new(tail, self.handler)).await,
            None => self.handler.handle(invocation).await,
        }
    }
}
