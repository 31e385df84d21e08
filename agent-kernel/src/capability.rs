//! Capability executors and static discovery.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use agent_memory::StateHandle;
use agent_policy::AuthContext;
use agent_primitives::{Capability, CapabilityResult, PluginManifest, Task};
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

/// Everything an executor receives for one call.
#[derive(Clone)]
pub struct CapabilityContext {
    task: Arc<Task>,
    arguments: Value,
    auth: Option<AuthContext>,
    state: Option<StateHandle>,
}

impl fmt::Debug for CapabilityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityContext")
            .field("task_id", &self.task.id())
            .field("user_id", &self.auth.as_ref().map(AuthContext::user_id))
            .field("stateful", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

impl CapabilityContext {
    pub(crate) fn new(
        task: Arc<Task>,
        arguments: Value,
        auth: Option<AuthContext>,
        state: Option<StateHandle>,
    ) -> Self {
        Self {
            task,
            arguments,
            auth,
            state,
        }
    }

    /// Task being processed.
    #[must_use]
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Arguments supplied by the model, or null for direct execution.
    #[must_use]
    pub fn arguments(&self) -> &Value {
        &self.arguments
    }

    /// Caller authentication, if any.
    #[must_use]
    pub fn auth(&self) -> Option<&AuthContext> {
        self.auth.as_ref()
    }

    /// Conversation state, present when state management is enabled for the
    /// capability.
    #[must_use]
    pub fn state(&self) -> Option<&StateHandle> {
        self.state.as_ref()
    }
}

/// Raw behaviour behind a capability.
#[async_trait]
pub trait CapabilityExecutor: Send + Sync {
    /// Runs the capability and returns its textual result.
    async fn execute(&self, context: CapabilityContext) -> CapabilityResult<String>;
}

#[async_trait]
impl<F, Fut> CapabilityExecutor for F
where
    F: Send + Sync + Fn(CapabilityContext) -> Fut,
    Fut: Future<Output = CapabilityResult<String>> + Send,
{
    async fn execute(&self, context: CapabilityContext) -> CapabilityResult<String> {
        (self)(context).await
    }
}

/// Descriptor and executor pair produced by a [`CapabilityProvider`].
#[derive(Clone)]
pub struct DiscoveredCapability {
    /// Descriptor with required scopes and metadata.
    pub capability: Capability,
    /// Executor invoked by the registry.
    pub executor: Arc<dyn CapabilityExecutor>,
}

impl fmt::Debug for DiscoveredCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveredCapability")
            .field("capability", &self.capability.id())
            .finish_non_exhaustive()
    }
}

impl DiscoveredCapability {
    /// Pairs a descriptor with its executor.
    #[must_use]
    pub fn new(capability: Capability, executor: impl CapabilityExecutor + 'static) -> Self {
        Self {
            capability,
            executor: Arc::new(executor),
        }
    }
}

/// Source of capabilities registered at startup.
///
/// Providers are listed statically by the application; nothing is found
/// by scanning loaded code.
pub trait CapabilityProvider: Send + Sync {
    /// Provider label used in logs.
    fn name(&self) -> &str;

    /// Capabilities contributed by this provider.
    fn discover(&self) -> Vec<DiscoveredCapability>;
}

/// Provider backed by a [`PluginManifest`] plus one executor per
/// declared capability.
pub struct ManifestProvider {
    manifest: PluginManifest,
    executors: HashMap<String, Arc<dyn CapabilityExecutor>>,
}

impl fmt::Debug for ManifestProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestProvider")
            .field("plugin_id", &self.manifest.plugin_id())
            .field("executors", &self.executors.len())
            .finish()
    }
}

impl ManifestProvider {
    /// Wraps `manifest` with no executors bound yet.
    #[must_use]
    pub fn new(manifest: PluginManifest) -> Self {
        Self {
            manifest,
            executors: HashMap::new(),
        }
    }

    /// Binds the executor for the capability `id`.
    #[must_use]
    pub fn with_executor(mut self, id: &str, executor: impl CapabilityExecutor + 'static) -> Self {
        self.executors.insert(id.to_owned(), Arc::new(executor));
        self
    }

    /// Returns the wrapped manifest.
    #[must_use]
    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }
}

impl CapabilityProvider for ManifestProvider {
    fn name(&self) -> &str {
        self.manifest.plugin_id()
    }

    fn discover(&self) -> Vec<DiscoveredCapability> {
        self.manifest
            .capabilities()
            .iter()
            .filter_map(|capability| {
                let Some(executor) = self.executors.get(capability.id().as_str()) else {
                    warn!(
                        plugin = self.manifest.plugin_id(),
                        capability = %capability.id(),
                        "capability declared without an executor; skipped"
                    );
                    return None;
                };
                Some(DiscoveredCapability {
                    capability: capability.clone(),
                    executor: Arc::clone(executor),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use agent_primitives::CapabilityId;

    use super::*;

    fn capability(id: &str) -> Capability {
        Capability::unscoped(CapabilityId::new(id).unwrap())
    }

    #[tokio::test]
    async fn closures_are_executors() {
        let executor = |context: CapabilityContext| async move {
            Ok::<_, agent_primitives::CapabilityError>(format!("task {}", context.task().id()))
        };
        let context = CapabilityContext::new(Arc::new(Task::new("t-1")), Value::Null, None, None);
        assert_eq!(executor.execute(context).await.unwrap(), "task t-1");
    }

    #[test]
    fn manifest_provider_skips_unbound_capabilities() {
        let manifest = PluginManifest::builder("weather")
            .capability(capability("forecast"))
            .capability(capability("alerts"))
            .build()
            .unwrap();
        let provider = ManifestProvider::new(manifest)
            .with_executor("forecast", |_: CapabilityContext| async {
                Ok::<_, agent_primitives::CapabilityError>("sunny".to_owned())
            });

        let discovered = provider.discover();
        assert_eq!(provider.name(), "weather");
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].capability.id().as_str(), "forecast");
        assert_eq!(discovered[0].capability.plugin_id(), Some("weather"));
    }
}
