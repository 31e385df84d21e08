//! Process-wide wiring of scopes, registries, middleware and state.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use agent_config::{AgentConfig, StateBackendKind, StateManagementConfig, ToolServerConfig};
use agent_memory::{
    ConversationContext, FileStorage, InMemoryKeyValueStore, InMemoryStorage, KeyValueStorage,
    KeyValueStore, StateStorage,
};
use agent_middleware::MiddlewareResources;
use agent_policy::{
    AuditSink, AuthContext, Authenticator, Credentials, PolicyError, PolicyResult, ScopeHierarchy,
    ScopeService, StaticCredentialAuthenticator, TracingAuditSink,
};
use agent_tools::{ToolRegistry, ToolServerConnection, ToolServerPolicy};
use futures::future::join_all;
use tracing::{info, warn};

use crate::builtin::BuiltinProvider;
use crate::capability::CapabilityProvider;
use crate::error::KernelResult;
use crate::registry::CapabilityRegistry;

/// Everything a dispatcher needs, built once at startup.
pub struct AppContext {
    config: Arc<AgentConfig>,
    scopes: Arc<ScopeService>,
    authenticators: Vec<Arc<dyn Authenticator>>,
    resources: Arc<MiddlewareResources>,
    tools: Arc<ToolRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    state: Option<ConversationContext>,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("agent", &self.config.agent.name)
            .field("capabilities", &self.capabilities.list())
            .field("tools", &self.tools.list_names())
            .field("state", &self.state.as_ref().map(ConversationContext::backend))
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Starts a builder for `config`.
    #[must_use]
    pub fn builder(config: AgentConfig) -> AppContextBuilder {
        AppContextBuilder {
            config,
            providers: Vec::new(),
            tool_servers: Vec::new(),
            audit: None,
            kv_store: None,
        }
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Scope hierarchy service.
    #[must_use]
    pub fn scopes(&self) -> &Arc<ScopeService> {
        &self.scopes
    }

    /// Tool registry.
    #[must_use]
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Capability registry.
    #[must_use]
    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    /// Shared middleware resources.
    #[must_use]
    pub fn middleware(&self) -> &Arc<MiddlewareResources> {
        &self.resources
    }

    /// Conversation store, when state management is enabled anywhere.
    #[must_use]
    pub fn state(&self) -> Option<&ConversationContext> {
        self.state.as_ref()
    }

    /// Resolves credentials with the first authenticator of matching type.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::AuthenticationFailed`] when no authenticator
    /// accepts the credentials.
    pub async fn authenticate(&self, credentials: &Credentials) -> PolicyResult<AuthContext> {
        let Some(authenticator) = self
            .authenticators
            .iter()
            .find(|a| a.auth_type() == credentials.auth_type())
        else {
            return Err(PolicyError::authentication("no authenticator for these credentials"));
        };
        authenticator.authenticate(credentials).await
    }

    /// Removes every capability and drops rate-limit and cache state.
    pub async fn reset(&self) {
        self.capabilities.shutdown();
        self.resources.reset_rate_limits();
        if let Err(err) = self.resources.clear_caches().await {
            warn!(%err, "failed to clear caches during reset");
        }
        info!(agent = %self.config.agent.name, "application context reset");
    }
}

/// Builder for [`AppContext`].
pub struct AppContextBuilder {
    config: AgentConfig,
    providers: Vec<Arc<dyn CapabilityProvider>>,
    tool_servers: Vec<Arc<dyn ToolServerConnection>>,
    audit: Option<Arc<dyn AuditSink>>,
    kv_store: Option<Arc<dyn KeyValueStore>>,
}

impl fmt::Debug for AppContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContextBuilder")
            .field("agent", &self.config.agent.name)
            .field("providers", &self.providers.len())
            .field("tool_servers", &self.tool_servers.len())
            .finish_non_exhaustive()
    }
}

impl AppContextBuilder {
    /// Adds a capability provider.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Adds an external tool server.
    #[must_use]
    pub fn tool_server(mut self, connection: Arc<dyn ToolServerConnection>) -> Self {
        self.tool_servers.push(connection);
        self
    }

    /// Replaces the default tracing audit sink.
    #[must_use]
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Key-value store backing `kv` state and caches. Defaults to an
    /// in-process store.
    #[must_use]
    pub fn kv_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.kv_store = Some(store);
        self
    }

    /// Builds the context: hierarchy, authenticators, state store,
    /// registries, discovered capabilities, then tool servers.
    ///
    /// Tool servers that fail to register are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::KernelError`] for invalid configuration, credential
    /// setup failures, an unavailable state backend or a failed capability
    /// registration.
    pub async fn build(self) -> KernelResult<AppContext> {
        let Self {
            config,
            providers,
            tool_servers,
            audit,
            kv_store,
        } = self;
        config.validate()?;
        let config = Arc::new(config);

        let scopes = Arc::new(ScopeService::with_hierarchy(ScopeHierarchy::from_edges(
            config.security.scope_hierarchy.clone(),
        )));
        let authenticators = authenticators(&config, &scopes)?;

        let kv_store = kv_store.unwrap_or_else(|| Arc::new(InMemoryKeyValueStore::new()));
        let resources = Arc::new(MiddlewareResources::new().with_kv_store(Arc::clone(&kv_store)));
        let state = if state_wanted(&config) {
            let storage = open_storage(&config.state_management, &kv_store).await?;
            Some(ConversationContext::new(storage))
        } else {
            None
        };

        let audit = audit.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let tools = Arc::new(
            ToolRegistry::new(Arc::clone(&scopes)).with_audit_sink(Arc::clone(&audit)),
        );
        let capabilities = Arc::new(
            CapabilityRegistry::new(Arc::clone(&scopes), audit, Arc::clone(&resources))
                .with_tool_registry(Arc::clone(&tools)),
        );
        capabilities.configure(Arc::clone(&config));
        if let Some(context) = &state {
            capabilities.set_state_context(context.clone());
        }

        let builtin = BuiltinProvider::new(config.agent.name.clone(), &capabilities);
        let mut sources: Vec<&dyn CapabilityProvider> = vec![&builtin];
        sources.extend(providers.iter().map(|p| p.as_ref() as &dyn CapabilityProvider));
        capabilities.register_provider(&sources)?;
        capabilities.apply_global_middleware();
        capabilities.apply_global_state();

        register_tool_servers(&tools, &config, tool_servers).await;

        info!(
            agent = %config.agent.name,
            capabilities = capabilities.list().len(),
            tools = tools.list_names().len(),
            state = state.as_ref().map_or("disabled", ConversationContext::backend),
            "application context ready"
        );
        Ok(AppContext {
            config,
            scopes,
            authenticators,
            resources,
            tools,
            capabilities,
            state,
        })
    }
}

fn authenticators(
    config: &AgentConfig,
    scopes: &Arc<ScopeService>,
) -> KernelResult<Vec<Arc<dyn Authenticator>>> {
    let auth = &config.security.auth;
    let mut authenticators: Vec<Arc<dyn Authenticator>> = Vec::new();
    if !auth.api_keys.is_empty() {
        let mut keys = StaticCredentialAuthenticator::api_keys(Arc::clone(scopes));
        for grant in &auth.api_keys {
            keys = keys.grant(&grant.secret, &grant.user_id, grant.scopes.iter().cloned())?;
        }
        authenticators.push(Arc::new(keys));
    }
    if !auth.bearer_tokens.is_empty() {
        let mut tokens = StaticCredentialAuthenticator::bearer_tokens(Arc::clone(scopes));
        for grant in &auth.bearer_tokens {
            tokens = tokens.grant(&grant.secret, &grant.user_id, grant.scopes.iter().cloned())?;
        }
        authenticators.push(Arc::new(tokens));
    }
    Ok(authenticators)
}

fn state_wanted(config: &AgentConfig) -> bool {
    config.state_management.enabled
        || config
            .plugins
            .iter()
            .filter_map(|plugin| plugin.state_override.as_ref())
            .any(|state| state.enabled)
}

async fn open_storage(
    settings: &StateManagementConfig,
    kv_store: &Arc<dyn KeyValueStore>,
) -> KernelResult<Arc<dyn StateStorage>> {
    Ok(match settings.backend {
        StateBackendKind::Memory => Arc::new(InMemoryStorage::new()),
        StateBackendKind::File => Arc::new(FileStorage::open(&settings.storage_dir).await?),
        StateBackendKind::Kv => Arc::new(
            KeyValueStorage::new(Arc::clone(kv_store))
                .with_prefix(settings.key_prefix.clone())
                .with_ttl(settings.ttl_secs.map(Duration::from_secs)),
        ),
    })
}

fn policy_for(config: Option<&ToolServerConfig>) -> ToolServerPolicy {
    let Some(config) = config else {
        return ToolServerPolicy::default();
    };
    let set = |items: &[String]| items.iter().cloned().collect::<BTreeSet<_>>();
    ToolServerPolicy {
        tool_scopes: config
            .tool_scopes
            .iter()
            .map(|(tool, scopes)| (tool.clone(), set(scopes)))
            .collect(),
        default_scopes: set(&config.default_scopes),
        allowed_tools: set(&config.allowed_tools),
        blocked_tools: set(&config.blocked_tools),
    }
}

async fn register_tool_servers(
    tools: &ToolRegistry,
    config: &AgentConfig,
    servers: Vec<Arc<dyn ToolServerConnection>>,
) {
    let registrations = servers.into_iter().map(|connection| async move {
        let name = connection.name().to_owned();
        let server_config = config.tool_server(&name);
        if server_config.is_none() {
            warn!(
                server = %name,
                "no policy configured for tool server; its tools will not be offered"
            );
        }
        let policy = policy_for(server_config);
        (name, tools.register_tool_server(connection, &policy).await)
    });
    for (name, outcome) in join_all(registrations).await {
        match outcome {
            Ok(count) => info!(server = %name, count, "tool server registered"),
            Err(err) => warn!(server = %name, %err, "tool server registration failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_policy::AuthType;
    use serde_json::json;

    use super::*;

    fn config(value: serde_json::Value) -> AgentConfig {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn builds_with_defaults() {
        let app = AppContext::builder(AgentConfig::default()).build().await.unwrap();
        assert_eq!(app.capabilities().list(), vec!["capabilities", "echo", "status"]);
        assert!(app.state().is_none());
        assert!(app.scopes().is_initialized());
    }

    #[tokio::test]
    async fn authenticates_configured_keys() {
        let app = AppContext::builder(config(json!({
            "security": {
                "scope_hierarchy": {"admin": ["read"]},
                "auth": {"api_keys": [{"key": "k-1", "user_id": "ops", "scopes": ["admin"]}]}
            }
        })))
        .build()
        .await
        .unwrap();

        let auth = app
            .authenticate(&Credentials::ApiKey("k-1".into()))
            .await
            .unwrap();
        assert_eq!(auth.user_id(), "ops");
        assert_eq!(auth.auth_type(), AuthType::ApiKey);
        assert!(auth.has_scope("read"));
        assert!(app.authenticate(&Credentials::Bearer("k-1".into())).await.is_err());
    }

    #[tokio::test]
    async fn opens_configured_state_backend() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppContext::builder(config(json!({
            "state_management": {"enabled": true, "backend": "file", "storage_dir": dir.path()}
        })))
        .build()
        .await
        .unwrap();
        assert_eq!(app.state().map(ConversationContext::backend), Some("file"));
        assert_eq!(app.capabilities().state_info().stateful, 3);
    }

    #[tokio::test]
    async fn reset_clears_capabilities() {
        let app = AppContext::builder(AgentConfig::default()).build().await.unwrap();
        app.reset().await;
        assert!(app.capabilities().list().is_empty());
        assert!(app.tools().list_names().is_empty());
    }
}
