//! Ordered interceptor chains.

use std::fmt;
use std::sync::Arc;

use agent_primitives::CapabilityResult;

use crate::interceptor::{Handler, Interceptor, Invocation, Next};

/// Interceptors (outermost first) around a terminal handler.
#[derive(Clone)]
pub struct Pipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
    handler: Arc<dyn Handler>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("interceptors", &self.interceptor_names())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Starts a pipeline around `handler`.
    #[must_use]
    pub fn builder(handler: Arc<dyn Handler>) -> PipelineBuilder {
        PipelineBuilder {
            interceptors: Vec::new(),
            handler,
        }
    }

    /// Runs `invocation` through every interceptor and the handler.
    ///
    /// # Errors
    ///
    /// Propagates the first error surfaced by an interceptor or the handler.
    pub async fn run(&self, invocation: Invocation) -> CapabilityResult<String> {
        Next::new(&self.interceptors, self.handler.as_ref())
            .run(invocation)
            .await
    }

    /// Interceptor labels, outermost first.
    #[must_use]
    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|layer| layer.name()).collect()
    }

    /// Returns the terminal handler.
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Returns a builder seeded with this pipeline's handler and layers.
    #[must_use]
    pub fn to_builder(&self) -> PipelineBuilder {
        PipelineBuilder {
            interceptors: self.interceptors.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Builder for [`Pipeline`]. Layers are listed outermost first.
pub struct PipelineBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
    handler: Arc<dyn Handler>,
}

impl PipelineBuilder {
    /// Appends a layer inside every layer added so far.
    #[must_use]
    pub fn layer(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Appends several layers in declaration order.
    #[must_use]
    pub fn layers<I>(mut self, interceptors: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Interceptor>>,
    {
        self.interceptors.extend(interceptors);
        self
    }

    /// Inserts a layer outside every layer added so far.
    #[must_use]
    pub fn wrap(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.insert(0, interceptor);
        self
    }

    /// Finalises the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            interceptors: self.interceptors,
            handler: self.handler,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use agent_primitives::Task;
    use async_trait::async_trait;

    use super::*;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor for Recorder {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn invoke(&self, invocation: Invocation, next: Next<'_>) -> CapabilityResult<String> {
            self.log.lock().unwrap().push(format!("enter {}", self.label));
            let result = next.run(invocation).await;
            self.log.lock().unwrap().push(format!("exit {}", self.label));
            result.map(|value| format!("{}({value})", self.label))
        }
    }

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, invocation: Invocation) -> CapabilityResult<String> {
            Ok(invocation.function().to_owned())
        }
    }

    #[tokio::test]
    async fn first_declared_layer_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let layer = |label| {
            Arc::new(Recorder {
                label,
                log: Arc::clone(&log),
            }) as Arc<dyn Interceptor>
        };
        let pipeline = Pipeline::builder(Arc::new(Echo))
            .layer(layer("outer"))
            .layer(layer("inner"))
            .wrap(layer("state"))
            .build();

        let result = pipeline
            .run(Invocation::new("echo", Arc::new(Task::new("t"))))
            .await
            .unwrap();

        assert_eq!(result, "state(outer(inner(echo)))");
        assert_eq!(pipeline.interceptor_names(), ["state", "outer", "inner"]);
        assert_eq!(
            *log.lock().unwrap(),
            [
                "enter state",
                "enter outer",
                "enter inner",
                "exit inner",
                "exit outer",
                "exit state"
            ]
        );
    }
}
