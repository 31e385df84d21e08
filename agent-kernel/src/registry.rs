//! Capability registry with per-capability layered pipelines.
//!
//! Every registered capability is wrapped, innermost first, in an auth layer,
//! the resolved middleware stack, a scope guard when that stack is non-empty
//! and an optional state layer. Each outer
//! layer carries a construction-time marker so the global sweeps only touch
//! entries whose layer is still unresolved.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use agent_config::AgentConfig;
use agent_memory::ConversationContext;
use agent_middleware::{Interceptor, Invocation, MiddlewareResources, MiddlewareSpec, Pipeline};
use agent_policy::{AuditSink, ScopeService, current_auth};
use agent_primitives::{Capability, CapabilityError, CapabilityResult, Task};
use agent_tools::{ToolRegistry, ToolSchema, sanitize_function_name};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityExecutor, CapabilityProvider, DiscoveredCapability};
use crate::layers::{AuthLayer, ScopeGate, ScopeGuard, StateInterceptor};

/// Per-capability registration choices.
///
/// `None` for `middleware` or `state` defers to the configured defaults and
/// leaves the layer eligible for the global sweeps.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationOptions {
    /// Overrides the descriptor's required scopes when set.
    pub required_scopes: Option<BTreeSet<String>>,
    /// Whether scopes are enforced at all.
    pub auth_enabled: bool,
    /// Explicit middleware stack, outermost first.
    pub middleware: Option<Vec<MiddlewareSpec>>,
    /// Explicit state management choice.
    pub state: Option<bool>,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            required_scopes: None,
            auth_enabled: true,
            middleware: None,
            state: None,
        }
    }
}

impl RegistrationOptions {
    /// Sets the required scopes.
    #[must_use]
    pub fn with_required_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_scopes = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    /// Disables scope enforcement.
    #[must_use]
    pub fn without_auth(mut self) -> Self {
        self.auth_enabled = false;
        self
    }

    /// Pins the middleware stack.
    #[must_use]
    pub fn with_middleware(mut self, specs: Vec<MiddlewareSpec>) -> Self {
        self.middleware = Some(specs);
        self
    }

    /// Pins state management on or off.
    #[must_use]
    pub fn with_state(mut self, enabled: bool) -> Self {
        self.state = Some(enabled);
        self
    }
}

/// Snapshot of middleware application across the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MiddlewareInfo {
    /// Registered capabilities.
    pub total: usize,
    /// Capabilities whose middleware layer is resolved.
    pub applied: usize,
    /// Interceptor names per capability, outermost first.
    pub stacks: BTreeMap<String, Vec<&'static str>>,
}

/// Snapshot of state management across the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateInfo {
    /// Registered capabilities.
    pub total: usize,
    /// Capabilities whose state layer is resolved.
    pub applied: usize,
    /// Capabilities receiving a state handle.
    pub stateful: usize,
    /// Label of the attached state backend.
    pub backend: Option<&'static str>,
}

#[derive(Clone)]
struct Entry {
    capability: Capability,
    options: RegistrationOptions,
    handler: Arc<AuthLayer>,
    middleware: Vec<Arc<dyn Interceptor>>,
    middleware_applied: bool,
    state: Option<ConversationContext>,
    state_applied: bool,
    pipeline: Pipeline,
}

impl Entry {
    fn rebuild(mut self) -> Self {
        let mut builder = Pipeline::builder(self.handler.clone()).layers(self.middleware.clone());
        if self.handler.gate().enforces() && !self.middleware.is_empty() {
            builder = builder.wrap(Arc::new(ScopeGuard::new(Arc::clone(self.handler.gate()))));
        }
        if let Some(context) = &self.state {
            builder = builder.wrap(Arc::new(StateInterceptor::new(context.clone())));
        }
        self.pipeline = builder.build();
        self
    }
}

#[derive(Default)]
struct LayerSources {
    config: Option<Arc<AgentConfig>>,
    state: Option<ConversationContext>,
}

/// Registry of executable capabilities.
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, Arc<Entry>>>,
    sources: RwLock<LayerSources>,
    scopes: Arc<ScopeService>,
    audit: Arc<dyn AuditSink>,
    resources: Arc<MiddlewareResources>,
    tools: Option<Arc<ToolRegistry>>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.list())
            .finish_non_exhaustive()
    }
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        scopes: Arc<ScopeService>,
        audit: Arc<dyn AuditSink>,
        resources: Arc<MiddlewareResources>,
    ) -> Self {
        Self {
            entries: RwLock::default(),
            sources: RwLock::default(),
            scopes,
            audit,
            resources,
            tools: None,
        }
    }

    /// Publishes every registered capability as a built-in function of
    /// `tools`.
    #[must_use]
    pub fn with_tool_registry(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Installs the configuration used to resolve deferred layers.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn configure(&self, config: Arc<AgentConfig>) {
        self.sources.write().expect("capability registry poisoned").config = Some(config);
    }

    /// Installs the conversation store used by stateful capabilities.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn set_state_context(&self, context: ConversationContext) {
        self.sources.write().expect("capability registry poisoned").state = Some(context);
    }

    /// Registers `capability`, replacing any previous registration of the
    /// same id.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Configuration`] when an explicit scope
    /// override is empty while auth is enabled.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn register(
        &self,
        capability: Capability,
        executor: impl CapabilityExecutor + 'static,
        options: RegistrationOptions,
    ) -> CapabilityResult<()> {
        self.insert(capability, Arc::new(executor), options)
    }

    fn insert(
        &self,
        capability: Capability,
        executor: Arc<dyn CapabilityExecutor>,
        options: RegistrationOptions,
    ) -> CapabilityResult<()> {
        let id = capability.id().as_str().to_owned();
        let empty_override = options.required_scopes.as_ref().is_some_and(BTreeSet::is_empty);
        if options.auth_enabled && empty_override {
            return Err(CapabilityError::configuration(format!(
                "capability `{id}` overrides its scopes with an empty set"
            )));
        }
        let capability = match &options.required_scopes {
            Some(scopes) => capability.with_required_scopes(scopes.iter().cloned()),
            None => capability,
        };
        let gate = ScopeGate::new(
            id.clone(),
            capability.required_scopes().clone(),
            options.auth_enabled,
            Arc::clone(&self.scopes),
            Arc::clone(&self.audit),
        );
        let handler = Arc::new(AuthLayer::new(Arc::new(gate), executor));

        let (middleware, middleware_applied, state, state_applied) = {
            let sources = self.sources.read().expect("capability registry poisoned");
            let (middleware, middleware_applied) = self.resolve_middleware(&id, &options, &sources);
            let (state, state_applied) = resolve_state(&id, &options, &sources);
            (middleware, middleware_applied, state, state_applied)
        };

        let entry = Entry {
            capability,
            options,
            pipeline: Pipeline::builder(handler.clone()).build(),
            handler,
            middleware,
            middleware_applied,
            state,
            state_applied,
        }
        .rebuild();

        self.publish(&entry.capability);
        let layers = entry.pipeline.interceptor_names();
        let previous = self
            .entries
            .write()
            .expect("capability registry poisoned")
            .insert(id.clone(), Arc::new(entry));
        if previous.is_some() {
            warn!(capability_id = %id, "capability re-registered; replacing");
        }
        debug!(capability_id = %id, ?layers, "capability registered");
        Ok(())
    }

    /// Registers a discovered capability, applying configured scopes and
    /// the enabled flag. Returns whether it was registered.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::register`] errors.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn register_discovered(&self, discovered: DiscoveredCapability) -> CapabilityResult<bool> {
        let DiscoveredCapability { capability, executor } = discovered;
        let config = self
            .sources
            .read()
            .expect("capability registry poisoned")
            .config
            .clone();
        let mut options = RegistrationOptions::default();
        if let Some(config) = config {
            let id = capability.id().as_str();
            if !config.is_enabled(id) {
                info!(capability_id = id, "capability disabled by configuration");
                return Ok(false);
            }
            options.required_scopes = config.required_scopes(id).filter(|s| !s.is_empty());
            options.auth_enabled = config.security.enabled;
        }
        self.insert(capability, executor, options)?;
        Ok(true)
    }

    /// Registers everything `providers` discover. Returns the number of
    /// capabilities registered.
    ///
    /// # Errors
    ///
    /// Stops at the first registration failure.
    pub fn register_provider(
        &self,
        providers: &[&dyn CapabilityProvider],
    ) -> CapabilityResult<usize> {
        let mut registered = 0;
        for provider in providers {
            let discovered = provider.discover();
            debug!(provider = provider.name(), count = discovered.len(), "capabilities discovered");
            for capability in discovered {
                if self.register_discovered(capability)? {
                    registered += 1;
                }
            }
        }
        info!(registered, "capability discovery complete");
        Ok(registered)
    }

    /// Removes a capability. Returns whether it existed.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self
            .entries
            .write()
            .expect("capability registry poisoned")
            .remove(id);
        if let (Some(_), Some(tools)) = (&removed, &self.tools) {
            tools.remove(&sanitize_function_name(id));
        }
        removed.is_some()
    }

    /// Sorted ids of every registered capability.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .expect("capability registry poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Descriptor of a registered capability.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn get_metadata(&self, id: &str) -> Option<Capability> {
        self.entry(id).map(|entry| entry.capability.clone())
    }

    /// Whether `id` is registered.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .expect("capability registry poisoned")
            .contains_key(id)
    }

    /// Maps a published function name back to its capability id.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn resolve_function(&self, name: &str) -> Option<String> {
        let entries = self.entries.read().expect("capability registry poisoned");
        if entries.contains_key(name) {
            return Some(name.to_owned());
        }
        entries
            .keys()
            .find(|id| sanitize_function_name(id) == name)
            .cloned()
    }

    /// Runs a capability with null arguments.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::NotFound`] for unknown ids and otherwise
    /// whatever the pipeline returns.
    pub async fn execute(&self, id: &str, task: &Task) -> CapabilityResult<String> {
        self.execute_with(id, Arc::new(task.clone()), Value::Null).await
    }

    /// Runs a capability with model-supplied arguments.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::NotFound`] for unknown ids and otherwise
    /// whatever the pipeline returns.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub async fn execute_with(
        &self,
        id: &str,
        task: Arc<Task>,
        arguments: Value,
    ) -> CapabilityResult<String> {
        let entry = self.entry(id).ok_or_else(|| CapabilityError::not_found(id))?;
        let invocation = Invocation::new(id, task)
            .with_arguments(arguments)
            .with_user_id(current_auth().map(|auth| auth.user_id().to_owned()));
        entry.pipeline.run(invocation).await
    }

    /// Resolves the middleware layer of every entry still waiting for it.
    /// Returns the number of entries rebuilt.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn apply_global_middleware(&self) -> usize {
        self.sweep(|registry, entry, sources| {
            if entry.middleware_applied {
                return None;
            }
            let id = entry.capability.id().as_str();
            let (middleware, applied) = registry.resolve_middleware(id, &entry.options, sources);
            applied.then(|| {
                let mut entry = entry.clone();
                entry.middleware = middleware;
                entry.middleware_applied = true;
                entry.rebuild()
            })
        })
    }

    /// Resolves the state layer of every entry still waiting for it.
    /// Returns the number of entries rebuilt.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn apply_global_state(&self) -> usize {
        self.sweep(|_, entry, sources| {
            if entry.state_applied {
                return None;
            }
            let id = entry.capability.id().as_str();
            let (state, applied) = resolve_state(id, &entry.options, sources);
            applied.then(|| {
                let mut entry = entry.clone();
                entry.state = state;
                entry.state_applied = true;
                entry.rebuild()
            })
        })
    }

    fn sweep<F>(&self, update: F) -> usize
    where
        F: Fn(&Self, &Entry, &LayerSources) -> Option<Entry>,
    {
        let snapshot: Vec<(String, Arc<Entry>)> = self
            .entries
            .read()
            .expect("capability registry poisoned")
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();
        let rebuilt: Vec<(String, Arc<Entry>, Entry)> = {
            let sources = self.sources.read().expect("capability registry poisoned");
            snapshot
                .into_iter()
                .filter_map(|(id, old)| update(self, &old, &sources).map(|new| (id, old, new)))
                .collect()
        };

        let mut entries = self.entries.write().expect("capability registry poisoned");
        let mut updated = 0;
        for (id, old, new) in rebuilt {
            match entries.get_mut(&id) {
                Some(current) if Arc::ptr_eq(current, &old) => {
                    *current = Arc::new(new);
                    updated += 1;
                }
                _ => debug!(capability_id = %id, "entry replaced during sweep; skipped"),
            }
        }
        if updated > 0 {
            info!(updated, "capability layers rebuilt");
        }
        updated
    }

    /// Clears every middleware marker so the next sweep re-resolves stacks.
    /// Explicit stacks are kept.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn reset_middleware(&self) {
        let mut entries = self.entries.write().expect("capability registry poisoned");
        for entry in entries.values_mut() {
            if entry.options.middleware.is_none() {
                let mut cleared = (**entry).clone();
                cleared.middleware_applied = false;
                *entry = Arc::new(cleared);
            }
        }
    }

    /// Clears every state marker so the next sweep re-resolves state.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn reset_state(&self) {
        let mut entries = self.entries.write().expect("capability registry poisoned");
        for entry in entries.values_mut() {
            let mut cleared = (**entry).clone();
            cleared.state_applied = false;
            *entry = Arc::new(cleared);
        }
    }

    /// Middleware application summary.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn middleware_info(&self) -> MiddlewareInfo {
        let entries = self.entries.read().expect("capability registry poisoned");
        MiddlewareInfo {
            total: entries.len(),
            applied: entries.values().filter(|e| e.middleware_applied).count(),
            stacks: entries
                .iter()
                .map(|(id, e)| (id.clone(), e.middleware.iter().map(|i| i.name()).collect()))
                .collect(),
        }
    }

    /// State management summary.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn state_info(&self) -> StateInfo {
        let backend = self
            .sources
            .read()
            .expect("capability registry poisoned")
            .state
            .as_ref()
            .map(ConversationContext::backend);
        let entries = self.entries.read().expect("capability registry poisoned");
        StateInfo {
            total: entries.len(),
            applied: entries.values().filter(|e| e.state_applied).count(),
            stateful: entries.values().filter(|e| e.state.is_some()).count(),
            backend,
        }
    }

    /// Required scopes and enforcement flag of a capability.
    #[must_use]
    pub fn scopes_for(&self, id: &str) -> Option<(BTreeSet<String>, bool)> {
        self.entry(id)
            .map(|e| (e.handler.required_scopes().clone(), e.handler.auth_enabled()))
    }

    /// Removes every capability.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn shutdown(&self) {
        let drained: Vec<String> = self
            .entries
            .write()
            .expect("capability registry poisoned")
            .drain()
            .map(|(id, _)| id)
            .collect();
        if let Some(tools) = &self.tools {
            for id in &drained {
                tools.remove(&sanitize_function_name(id));
            }
        }
        info!(removed = drained.len(), "capability registry shut down");
    }

    fn entry(&self, id: &str) -> Option<Arc<Entry>> {
        self.entries
            .read()
            .expect("capability registry poisoned")
            .get(id)
            .cloned()
    }

    fn publish(&self, capability: &Capability) {
        let Some(tools) = &self.tools else {
            return;
        };
        let mut schema = ToolSchema::new(
            sanitize_function_name(capability.id().as_str()),
            capability.description().unwrap_or(capability.name()),
        )
        .with_required_scopes(capability.required_scopes().iter().cloned());
        if let Some(parameters) = capability.parameters() {
            schema = schema.with_parameters(parameters.clone());
        }
        tools.register_builtin(schema);
    }

    fn resolve_middleware(
        &self,
        id: &str,
        options: &RegistrationOptions,
        sources: &LayerSources,
    ) -> (Vec<Arc<dyn Interceptor>>, bool) {
        if let Some(specs) = &options.middleware {
            return (self.resources.build_stack(specs), true);
        }
        let Some(config) = &sources.config else {
            return (Vec::new(), false);
        };
        let specs: Vec<MiddlewareSpec> = config
            .middleware_for(id)
            .into_iter()
            .filter_map(|entry| match MiddlewareSpec::from_entry(&entry.name, &entry.params) {
                Ok(spec) => Some(spec),
                Err(err) => {
                    warn!(
                        capability_id = id,
                        middleware = %entry.name,
                        %err,
                        "skipping middleware entry"
                    );
                    None
                }
            })
            .collect();
        (self.resources.build_stack(&specs), true)
    }
}

fn resolve_state(
    id: &str,
    options: &RegistrationOptions,
    sources: &LayerSources,
) -> (Option<ConversationContext>, bool) {
    let enabled = match (options.state, &sources.config) {
        (Some(enabled), _) => enabled,
        (None, Some(config)) => config.state_for(id).enabled,
        (None, None) => return (None, false),
    };
    match (enabled, &sources.state) {
        (false, _) => (None, true),
        (true, Some(context)) => (Some(context.clone()), true),
        (true, None) => {
            debug!(capability_id = id, "state requested before a store is attached");
            (None, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agent_config::{MiddlewareEntry, MiddlewareSection};
    use agent_memory::InMemoryStorage;
    use agent_middleware::CacheConfig;
    use agent_policy::{AuthContext, AuthType, CollectingAuditSink, ScopeHierarchy, with_auth};
    use agent_primitives::{CapabilityId, PluginManifest};
    use serde_json::json;

    use super::*;
    use crate::capability::{CapabilityContext, ManifestProvider};

    fn registry() -> CapabilityRegistry {
        let scopes = Arc::new(ScopeService::with_hierarchy(ScopeHierarchy::from_edges([(
            "admin",
            ["weather:read"],
        )])));
        CapabilityRegistry::new(
            scopes,
            Arc::new(CollectingAuditSink::new()),
            Arc::new(MiddlewareResources::new()),
        )
    }

    fn capability(id: &str, scopes: &[&str]) -> Capability {
        let mut builder = Capability::builder(CapabilityId::new(id).unwrap())
            .name(id)
            .unwrap();
        for scope in scopes {
            builder = builder.add_scope(*scope).unwrap();
        }
        builder.build().unwrap()
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl CapabilityExecutor + 'static {
        let counter = Arc::clone(counter);
        move |_: CapabilityContext| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CapabilityError>("ok".to_owned())
            }
        }
    }

    fn timed_config() -> Arc<AgentConfig> {
        Arc::new(AgentConfig {
            middleware: MiddlewareSection::List(vec![MiddlewareEntry::new("timed", Value::Null)]),
            ..AgentConfig::default()
        })
    }

    #[tokio::test]
    async fn execute_enforces_scopes() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let forecast = capability("forecast", &["weather:read"]);
        registry
            .register(forecast, counting(&calls), RegistrationOptions::default())
            .unwrap();
        let task = Task::new("t-1");

        let err = registry.execute("forecast", &task).await.unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let admin = AuthContext::new("ops", AuthType::ApiKey).with_scopes(["admin"]);
        let result = with_auth(admin, registry.execute("forecast", &task)).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(matches!(
            registry.execute("missing", &task).await,
            Err(CapabilityError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn cached_results_are_not_served_to_unauthorized_callers() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RegistrationOptions::default()
            .with_middleware(vec![MiddlewareSpec::Cached(CacheConfig::default())]);
        registry
            .register(capability("forecast", &["weather:read"]), counting(&calls), options)
            .unwrap();
        let task = Task::new("t-cache");

        let admin = AuthContext::new("ops", AuthType::ApiKey).with_scopes(["admin"]);
        for _ in 0..2 {
            let result = with_auth(admin.clone(), registry.execute("forecast", &task)).await;
            assert_eq!(result.unwrap(), "ok");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = registry.execute("forecast", &task).await.unwrap_err();
        assert!(err.is_permission_denied());

        let guest = AuthContext::new("guest", AuthType::Bearer).with_scopes(["news:read"]);
        let err = with_auth(guest, registry.execute("forecast", &task)).await.unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.middleware_info().stacks["forecast"], vec!["cached"]);
    }

    #[test]
    fn lookup_and_unregister() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register(capability("b.two", &[]), counting(&calls), RegistrationOptions::default())
            .unwrap();
        registry
            .register(capability("a.one", &[]), counting(&calls), RegistrationOptions::default())
            .unwrap();

        assert_eq!(registry.list(), vec!["a.one", "b.two"]);
        assert!(registry.contains("a.one"));
        assert_eq!(registry.resolve_function("a_one").as_deref(), Some("a.one"));
        assert_eq!(registry.get_metadata("b.two").unwrap().name(), "b.two");
        assert!(registry.unregister("a.one"));
        assert!(!registry.unregister("a.one"));

        registry.shutdown();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn empty_scope_override_is_rejected() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RegistrationOptions::default().with_required_scopes(Vec::<String>::new());
        assert!(matches!(
            registry.register(capability("x", &[]), counting(&calls), options),
            Err(CapabilityError::Configuration { .. })
        ));
    }

    #[test]
    fn middleware_sweep_is_idempotent_and_respects_explicit_stacks() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register(capability("deferred", &[]), counting(&calls), RegistrationOptions::default())
            .unwrap();
        registry
            .register(
                capability("pinned", &[]),
                counting(&calls),
                RegistrationOptions::default().with_middleware(Vec::new()),
            )
            .unwrap();

        let info = registry.middleware_info();
        assert_eq!((info.total, info.applied), (2, 1));

        assert_eq!(registry.apply_global_middleware(), 0);
        registry.configure(timed_config());
        assert_eq!(registry.apply_global_middleware(), 1);
        assert_eq!(registry.apply_global_middleware(), 0);

        let info = registry.middleware_info();
        assert_eq!(info.applied, 2);
        assert_eq!(info.stacks["deferred"], vec!["timed"]);
        assert!(info.stacks["pinned"].is_empty());

        registry.reset_middleware();
        assert_eq!(registry.middleware_info().applied, 1);
        assert_eq!(registry.apply_global_middleware(), 1);
    }

    #[tokio::test]
    async fn state_sweep_attaches_store() {
        let registry = registry();
        let executor = |ctx: CapabilityContext| async move {
            Ok::<_, CapabilityError>(
                ctx.state()
                    .map_or_else(|| "stateless".to_owned(), |s| s.context_id().to_owned()),
            )
        };
        let options = RegistrationOptions::default().with_state(true);
        registry.register(capability("memo", &[]), executor, options).unwrap();
        let task = Task::new("t-1").with_context_id("conv-9");
        assert_eq!(registry.execute("memo", &task).await.unwrap(), "stateless");
        assert_eq!(registry.state_info().applied, 0);

        let context = ConversationContext::new(Arc::new(InMemoryStorage::new()));
        registry.set_state_context(context);
        assert_eq!(registry.apply_global_state(), 1);
        assert_eq!(registry.apply_global_state(), 0);
        assert_eq!(registry.execute("memo", &task).await.unwrap(), "conv-9");

        let info = registry.state_info();
        assert_eq!((info.stateful, info.backend), (1, Some("memory")));
    }

    #[test]
    fn discovery_applies_configuration() {
        let registry = registry();
        let config: AgentConfig = serde_json::from_value(json!({
            "plugins": [{
                "plugin_id": "weather",
                "default_scopes": ["weather:read"],
                "capabilities": [
                    {"capability_id": "forecast"},
                    {"capability_id": "alerts", "enabled": false}
                ]
            }]
        }))
        .unwrap();
        registry.configure(Arc::new(config));

        let manifest = PluginManifest::builder("weather")
            .capability(capability("forecast", &[]))
            .capability(capability("alerts", &[]))
            .build()
            .unwrap();
        let provider = ManifestProvider::new(manifest)
            .with_executor("forecast", |_: CapabilityContext| async {
                Ok::<_, CapabilityError>("sunny".to_owned())
            })
            .with_executor("alerts", |_: CapabilityContext| async {
                Ok::<_, CapabilityError>("none".to_owned())
            });

        assert_eq!(registry.register_provider(&[&provider]).unwrap(), 1);
        assert_eq!(registry.list(), vec!["forecast"]);
        let (scopes, enforced) = registry.scopes_for("forecast").unwrap();
        assert!(scopes.contains("weather:read"));
        assert!(enforced);
    }
}
