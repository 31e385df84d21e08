//! Runtime registry for tool schemas and execution routing.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use agent_policy::{
    ANONYMOUS_USER, AuditRecord, AuditSink, AuthContext, ScopeRequestCache, ScopeService,
    TracingAuditSink, current_auth,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ToolError, ToolResult};
use crate::schema::{ToolOrigin, ToolSchema, sanitize_function_name};
use crate::server::{ToolServerConnection, ToolServerPolicy};

/// Trait implemented by in-process tool handlers.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Invokes the tool with the given JSON arguments.
    async fn invoke(&self, arguments: Value) -> ToolResult<Value>;
}

#[async_trait]
impl<F, Fut> Tool for F
where
    F: Send + Sync + Fn(Value) -> Fut,
    Fut: Future<Output = ToolResult<Value>> + Send,
{
    async fn invoke(&self, arguments: Value) -> ToolResult<Value> {
        (self)(arguments).await
    }
}

#[derive(Clone)]
struct LocalEntry {
    schema: ToolSchema,
    handler: Arc<dyn Tool>,
}

#[derive(Clone)]
struct ExternalEntry {
    schema: ToolSchema,
    server: String,
}

/// Registry of local, built-in, and tool-server functions.
///
/// Each category lives behind its own lock so one failing category cannot
/// take the others down when resolving a caller's tool set.
///
/// Local and external calls are checked again at call time against the
/// ambient [`AuthContext`] with the same fail-closed rule as
/// [`Self::available_for`], and every checked call is audited.
pub struct ToolRegistry {
    scopes: Arc<ScopeService>,
    audit: Arc<dyn AuditSink>,
    local: RwLock<HashMap<String, LocalEntry>>,
    builtin: RwLock<HashMap<String, ToolSchema>>,
    external: RwLock<HashMap<String, ExternalEntry>>,
    servers: RwLock<HashMap<String, Arc<dyn ToolServerConnection>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("registered", &self.list_names())
            .field("servers", &self.servers())
            .finish_non_exhaustive()
    }
}

fn render(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn sorted<T, F>(mut items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    items.sort_by(|a, b| key(a).cmp(key(b)));
    items
}

impl ToolRegistry {
    /// Creates an empty registry validating against `scopes`.
    #[must_use]
    pub fn new(scopes: Arc<ScopeService>) -> Self {
        Self {
            scopes,
            audit: Arc::new(TracingAuditSink),
            local: RwLock::default(),
            builtin: RwLock::default(),
            external: RwLock::default(),
            servers: RwLock::default(),
        }
    }

    /// Sends call audit records to `sink` instead of the tracing target.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Registers an in-process function.
    ///
    /// Re-registering the same description and parameters is ignored; a
    /// differing definition replaces the previous one.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn register_local<T>(&self, name: &str, handler: T, schema: ToolSchema)
    where
        T: Tool + 'static,
    {
        let schema = schema.renamed(name.to_owned()).with_origin(ToolOrigin::Local);
        let mut local = self.local.write().expect("tool registry poisoned");
        if let Some(existing) = local.get(name) {
            if existing.schema.same_definition(&schema) {
                debug!(tool = name, "function already registered with same schema");
                return;
            }
            warn!(tool = name, "function re-registered with different schema; overriding");
        }
        local.insert(
            name.to_owned(),
            LocalEntry {
                schema,
                handler: Arc::new(handler),
            },
        );
        debug!(tool = name, "registered local function");
    }

    /// Registers a framework function executed outside this registry.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn register_builtin(&self, schema: ToolSchema) {
        let schema = schema.with_origin(ToolOrigin::Builtin);
        let name = schema.name().to_owned();
        let mut builtin = self.builtin.write().expect("tool registry poisoned");
        if let Some(existing) = builtin.get(&name) {
            if existing.same_definition(&schema)
                && existing.required_scopes() == schema.required_scopes()
            {
                debug!(tool = %name, "built-in function already registered");
                return;
            }
            warn!(tool = %name, "built-in function re-registered; overriding");
        }
        builtin.insert(name, schema);
    }

    /// Initialises `connection` if needed and registers every tool it offers
    /// that `policy` admits. Returns the number of tools registered.
    ///
    /// Tool names are remapped to provider-safe identifiers; the server-side
    /// identifier is kept for [`Self::call_tool`].
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Server`] when initialisation or enumeration fails.
    /// Nothing is registered in that case.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub async fn register_tool_server(
        &self,
        connection: Arc<dyn ToolServerConnection>,
        policy: &ToolServerPolicy,
    ) -> ToolResult<usize> {
        let server = connection.name().to_owned();
        if !connection.is_initialized() {
            connection.initialize().await.map_err(|err| {
                warn!(server = %server, %err, "tool server failed to initialise");
                ToolError::server(&server, err.to_string())
            })?;
        }
        if !connection.is_initialized() {
            return Err(ToolError::server(&server, "connection not initialised"));
        }

        let tools = connection
            .list_tools()
            .await
            .map_err(|err| ToolError::server(&server, err.to_string()))?;

        let mut registered = 0;
        {
            let mut external = self.external.write().expect("tool registry poisoned");
            for tool in tools {
                if !policy.admits(&tool.name) {
                    debug!(server = %server, tool = %tool.name, "tool excluded by server policy");
                    continue;
                }
                let name = sanitize_function_name(&tool.name);
                let schema = ToolSchema::new(tool.name.clone(), tool.description)
                    .with_parameters(tool.parameters)
                    .with_required_scopes(policy.scopes_for(&tool.name))
                    .with_origin(ToolOrigin::External {
                        server: server.clone(),
                    })
                    .renamed(name.clone());

                if let Some(previous) = external.get(&name) {
                    warn!(
                        tool = %name,
                        previous = %previous.server,
                        server = %server,
                        "external tool name collision; latest registration wins"
                    );
                }
                info!(
                    server = %server,
                    original = %tool.name,
                    tool = %name,
                    "registered external tool"
                );
                external.insert(
                    name,
                    ExternalEntry {
                        schema,
                        server: server.clone(),
                    },
                );
                registered += 1;
            }
        }

        self.servers
            .write()
            .expect("tool registry poisoned")
            .insert(server, connection);
        Ok(registered)
    }

    /// Every schema, deduplicated by name. External tools shadow local and
    /// built-in functions of the same name.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut merged = BTreeMap::new();
        for entry in self.local.read().expect("tool registry poisoned").values() {
            merged.insert(entry.schema.name().to_owned(), entry.schema.clone());
        }
        for schema in self.builtin.read().expect("tool registry poisoned").values() {
            merged.insert(schema.name().to_owned(), schema.clone());
        }
        for entry in self.external.read().expect("tool registry poisoned").values() {
            if merged.contains_key(entry.schema.name()) {
                debug!(tool = entry.schema.name(), "external tool overrides local function");
            }
            merged.insert(entry.schema.name().to_owned(), entry.schema.clone());
        }
        merged.into_values().collect()
    }

    /// Schemas the holder of `held` may use.
    ///
    /// An empty scope set yields nothing. Entries without configured scopes
    /// are never granted. A category that cannot be read contributes nothing.
    pub fn available_for<I, S>(&self, held: I) -> Vec<ToolSchema>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let held: Vec<String> = held.into_iter().map(|s| s.as_ref().to_owned()).collect();
        if held.is_empty() {
            debug!("no scopes held; no tools available");
            return Vec::new();
        }

        let mut cache = self.scopes.request_cache();

        let external = self
            .external
            .read()
            .map_err(|_| ToolError::poisoned())
            .map(|entries| {
                let granted = entries
                    .values()
                    .filter(|entry| grant(&mut cache, &held, &entry.schema))
                    .map(|entry| entry.schema.clone())
                    .collect();
                sorted(granted, ToolSchema::name)
            });
        let local = self
            .local
            .read()
            .map_err(|_| ToolError::poisoned())
            .map(|entries| {
                let granted = entries
                    .values()
                    .filter(|entry| grant(&mut cache, &held, &entry.schema))
                    .map(|entry| entry.schema.clone())
                    .collect();
                sorted(granted, ToolSchema::name)
            });
        let builtin = self
            .builtin
            .read()
            .map_err(|_| ToolError::poisoned())
            .map(|schemas| {
                let granted = schemas
                    .values()
                    .filter(|schema| grant(&mut cache, &held, schema))
                    .cloned()
                    .collect();
                sorted(granted, ToolSchema::name)
            });

        let mut counts = [0usize; 3];
        let mut seen = HashSet::new();
        let mut available = Vec::new();
        let sources = [("external", external), ("local", local), ("builtin", builtin)];
        for (index, (category, result)) in sources.into_iter().enumerate() {
            match result {
                Ok(schemas) => {
                    counts[index] = schemas.len();
                    for schema in schemas {
                        if seen.insert(schema.name().to_owned()) {
                            available.push(schema);
                        }
                    }
                }
                Err(err) => warn!(category, %err, "tool filtering failed; category omitted"),
            }
        }

        let hits = cache.close();
        info!(
            held = held.len(),
            external = counts[0],
            local = counts[1],
            builtin = counts[2],
            granted = available.len(),
            cache_hits = hits,
            "tool set resolved"
        );
        available
    }

    /// Calls an external tool by its presented name on behalf of the ambient
    /// caller.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] for names not registered by a tool
    /// server, [`ToolError::PermissionDenied`] when the caller lacks the
    /// tool's scopes, [`ToolError::UnknownServer`] if the owning connection
    /// is gone, and forwards server failures.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult<String> {
        let entry = self
            .external
            .read()
            .expect("tool registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_owned(),
            })?;
        let auth = current_auth();
        let started = Instant::now();
        if let Err(err) = self.authorize(&entry.schema, auth.as_ref()) {
            self.audit(&entry.schema, auth.as_ref(), false, started);
            return Err(err);
        }

        let result = self.dispatch_external(&entry, arguments).await;
        self.audit(&entry.schema, auth.as_ref(), result.is_ok(), started);
        result
    }

    async fn dispatch_external(
        &self,
        entry: &ExternalEntry,
        arguments: Value,
    ) -> ToolResult<String> {
        let connection = self
            .servers
            .read()
            .expect("tool registry poisoned")
            .get(&entry.server)
            .cloned()
            .ok_or_else(|| ToolError::UnknownServer {
                server: entry.server.clone(),
            })?;

        debug!(
            tool = entry.schema.name(),
            original = entry.schema.original_name(),
            server = %entry.server,
            "calling external tool"
        );
        connection
            .call_tool(entry.schema.original_name(), arguments)
            .await
            .map(render)
    }

    /// Invokes a local handler on behalf of the ambient caller.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] when no local handler is registered
    /// under `name`, [`ToolError::PermissionDenied`] when the caller lacks the
    /// tool's scopes, or the handler's own failure.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub async fn invoke_local(&self, name: &str, arguments: Value) -> ToolResult<String> {
        let entry = self
            .local
            .read()
            .expect("tool registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_owned(),
            })?;
        let auth = current_auth();
        let started = Instant::now();
        if let Err(err) = self.authorize(&entry.schema, auth.as_ref()) {
            self.audit(&entry.schema, auth.as_ref(), false, started);
            return Err(err);
        }

        let result = entry.handler.invoke(arguments).await.map(render);
        self.audit(&entry.schema, auth.as_ref(), result.is_ok(), started);
        result
    }

    fn authorize(&self, schema: &ToolSchema, auth: Option<&AuthContext>) -> ToolResult<()> {
        let required = schema.required_scopes();
        let denied = |missing: Vec<String>| ToolError::PermissionDenied {
            tool: schema.name().to_owned(),
            missing,
        };
        if required.is_empty() {
            debug!(tool = schema.name(), "no scopes configured; call denied");
            return Err(denied(Vec::new()));
        }
        let Some(auth) = auth else {
            debug!(tool = schema.name(), "unauthenticated tool call denied");
            return Err(denied(required.iter().cloned().collect()));
        };
        let decision = self.scopes.validate(auth.scopes(), required);
        if decision.is_allowed() {
            Ok(())
        } else {
            debug!(tool = schema.name(), user_id = auth.user_id(), "tool call denied");
            Err(denied(decision.into_missing()))
        }
    }

    fn audit(
        &self,
        schema: &ToolSchema,
        auth: Option<&AuthContext>,
        success: bool,
        started: Instant,
    ) {
        let record = AuditRecord {
            capability_id: schema.name().to_owned(),
            user_id: auth.map_or_else(|| ANONYMOUS_USER.to_owned(), |a| a.user_id().to_owned()),
            held_scopes: auth
                .map(|a| self.scopes.expand(a.scopes()).into_iter().collect())
                .unwrap_or_default(),
            required_scopes: schema.required_scopes().iter().cloned().collect(),
            success,
            duration: started.elapsed(),
            recorded_at: Utc::now(),
        };
        if let Err(err) = self.audit.record(&record) {
            warn!(tool = schema.name(), %err, "audit sink failed");
        }
    }

    /// Returns the schema registered under `name`, external first.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn schema(&self, name: &str) -> Option<ToolSchema> {
        if let Some(entry) = self.external.read().expect("tool registry poisoned").get(name) {
            return Some(entry.schema.clone());
        }
        if let Some(entry) = self.local.read().expect("tool registry poisoned").get(name) {
            return Some(entry.schema.clone());
        }
        self.builtin.read().expect("tool registry poisoned").get(name).cloned()
    }

    /// Whether `name` belongs to a tool server.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn is_external(&self, name: &str) -> bool {
        self.external.read().expect("tool registry poisoned").contains_key(name)
    }

    /// Whether `name` has an in-process handler.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn is_local(&self, name: &str) -> bool {
        self.local.read().expect("tool registry poisoned").contains_key(name)
    }

    /// Whether `name` is a built-in function.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin.read().expect("tool registry poisoned").contains_key(name)
    }

    /// Removes a local or built-in function. Tool-server entries stay until
    /// their server is re-registered.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn remove(&self, name: &str) -> bool {
        let local = self.local.write().expect("tool registry poisoned").remove(name).is_some();
        let builtin = self.builtin.write().expect("tool registry poisoned").remove(name).is_some();
        if local || builtin {
            debug!(tool = name, "function removed");
        }
        local || builtin
    }

    /// Every registered name, sorted and deduplicated.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        names.extend(self.local.read().expect("tool registry poisoned").keys().cloned());
        names.extend(self.builtin.read().expect("tool registry poisoned").keys().cloned());
        names.extend(self.external.read().expect("tool registry poisoned").keys().cloned());
        names.into_iter().collect()
    }

    /// Names of the registered tool servers, sorted.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn servers(&self) -> Vec<String> {
        let mut servers: Vec<String> = self
            .servers
            .read()
            .expect("tool registry poisoned")
            .keys()
            .cloned()
            .collect();
        servers.sort_unstable();
        servers
    }
}

fn grant(cache: &mut ScopeRequestCache, held: &[String], schema: &ToolSchema) -> bool {
    if schema.required_scopes().is_empty() {
        debug!(tool = schema.name(), "no scopes configured; denied");
        return false;
    }
    let decision = cache.validate(held, schema.required_scopes());
    if !decision.is_allowed() {
        debug!(tool = schema.name(), missing = ?decision.missing(), "tool denied");
    }
    decision.is_allowed()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use agent_policy::{AuthType, CollectingAuditSink, ScopeHierarchy, with_auth};
    use agent_primitives::CapabilityError;
    use serde_json::json;

    use super::*;
    use crate::server::RemoteTool;

    struct FakeServer {
        name: &'static str,
        initialized: AtomicBool,
        fail_init: bool,
        tools: Vec<RemoteTool>,
        calls: AtomicUsize,
    }

    impl FakeServer {
        fn new(name: &'static str, tools: &[&str]) -> Self {
            Self {
                name,
                initialized: AtomicBool::new(false),
                fail_init: false,
                tools: tools
                    .iter()
                    .map(|tool| RemoteTool::new(*tool, format!("{tool} on {name}")))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ToolServerConnection for FakeServer {
        fn name(&self) -> &str {
            self.name
        }

        async fn initialize(&self) -> ToolResult<()> {
            if self.fail_init {
                return Err(ToolError::execution("refused"));
            }
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_initialized(&self) -> bool {
            self.initialized.load(Ordering::SeqCst)
        }

        async fn list_tools(&self) -> ToolResult<Vec<RemoteTool>> {
            Ok(self.tools.clone())
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"server": self.name, "tool": name, "args": arguments}))
        }
    }

    fn scopes() -> Arc<ScopeService> {
        Arc::new(ScopeService::with_hierarchy(ScopeHierarchy::from_edges([(
            "admin",
            ["files:read", "files:write"],
        )])))
    }

    fn policy(default: &[&str]) -> ToolServerPolicy {
        ToolServerPolicy {
            default_scopes: default.iter().map(|s| (*s).to_owned()).collect(),
            ..ToolServerPolicy::default()
        }
    }

    fn echo() -> impl Tool {
        |arguments: Value| async move { Ok::<_, ToolError>(arguments) }
    }

    fn admin() -> AuthContext {
        AuthContext::new("ops", AuthType::ApiKey).with_scopes(["admin"])
    }

    #[tokio::test]
    async fn identical_local_registration_is_ignored_and_different_overrides() {
        let registry = ToolRegistry::new(scopes());
        let schema = |description: &str| {
            ToolSchema::new("echo", description).with_required_scopes(["files:read"])
        };
        registry.register_local("echo", echo(), schema("Echo input"));
        registry.register_local("echo", echo(), schema("Echo input"));
        assert_eq!(registry.schemas().len(), 1);

        registry.register_local("echo", echo(), schema("Echo input loudly"));
        assert_eq!(registry.schemas()[0].description(), "Echo input loudly");

        let output = with_auth(admin(), registry.invoke_local("echo", json!("hi"))).await;
        assert_eq!(output.unwrap(), "hi");
    }

    #[tokio::test]
    async fn duplicate_external_names_yield_one_schema() {
        let registry = ToolRegistry::new(scopes());
        registry.register_local("search", echo(), ToolSchema::new("search", "local search"));
        registry
            .register_tool_server(
                Arc::new(FakeServer::new("alpha", &["search"])),
                &policy(&["files:read"]),
            )
            .await
            .unwrap();
        registry
            .register_tool_server(
                Arc::new(FakeServer::new("beta", &["search"])),
                &policy(&["files:read"]),
            )
            .await
            .unwrap();

        let schemas = registry.schemas();
        let searches: Vec<_> = schemas.iter().filter(|s| s.name() == "search").collect();
        assert_eq!(searches.len(), 1);
        assert!(matches!(searches[0].origin(), ToolOrigin::External { .. }));
        assert_eq!(registry.servers(), ["alpha", "beta"]);
    }

    #[tokio::test]
    async fn external_names_are_remapped_and_called_by_original() {
        let registry = ToolRegistry::new(scopes());
        let count = registry
            .register_tool_server(
                Arc::new(FakeServer::new("fs", &["filesystem:read_file"])),
                &policy(&["files:read"]),
            )
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(registry.is_external("filesystem_read_file"));

        let call = registry.call_tool("filesystem_read_file", json!({"path": "/tmp/a"}));
        let output = with_auth(admin(), call).await.unwrap();
        let output: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(output["tool"], "filesystem:read_file");

        let err = registry.call_tool("missing", Value::Null).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { name } if name == "missing"));
    }

    #[tokio::test]
    async fn failed_initialisation_registers_nothing() {
        let registry = ToolRegistry::new(scopes());
        let server = FakeServer {
            fail_init: true,
            ..FakeServer::new("broken", &["x"])
        };
        let err = registry
            .register_tool_server(Arc::new(server), &policy(&["files:read"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Server { server, .. } if server == "broken"));
        assert!(registry.list_names().is_empty());
        assert!(registry.servers().is_empty());
    }

    #[tokio::test]
    async fn allow_and_block_lists_filter_server_tools() {
        let registry = ToolRegistry::new(scopes());
        let policy = ToolServerPolicy {
            blocked_tools: BTreeSet::from(["rm".to_owned()]),
            ..policy(&["files:write"])
        };
        registry
            .register_tool_server(Arc::new(FakeServer::new("fs", &["ls", "rm"])), &policy)
            .await
            .unwrap();
        assert_eq!(registry.list_names(), ["ls"]);
    }

    #[tokio::test]
    async fn available_for_is_fail_closed() {
        let registry = ToolRegistry::new(scopes());
        registry.register_local("unscoped", echo(), ToolSchema::new("unscoped", "no scopes"));
        registry.register_local(
            "reader",
            echo(),
            ToolSchema::new("reader", "reads").with_required_scopes(["files:read"]),
        );
        let status = ToolSchema::new("status", "status").with_required_scopes(["admin"]);
        registry.register_builtin(status);
        registry
            .register_tool_server(Arc::new(FakeServer::new("fs", &["fs:ls"])), &policy(&[]))
            .await
            .unwrap();

        assert!(registry.available_for(Vec::<String>::new()).is_empty());

        let names = |held: &[&str]| -> Vec<String> {
            registry
                .available_for(held.iter().copied())
                .iter()
                .map(|schema| schema.name().to_owned())
                .collect()
        };
        assert_eq!(names(&["files:read"]), ["reader"]);
        assert_eq!(names(&["admin"]), ["reader", "status"]);
        assert!(names(&["other"]).is_empty());
    }

    #[tokio::test]
    async fn uninitialised_hierarchy_grants_nothing() {
        let registry = ToolRegistry::new(Arc::new(ScopeService::new()));
        registry.register_local(
            "reader",
            echo(),
            ToolSchema::new("reader", "reads").with_required_scopes(["files:read"]),
        );
        assert!(registry.available_for(["files:read"]).is_empty());
    }

    #[test]
    fn remove_drops_local_and_builtin_functions() {
        let registry = ToolRegistry::new(scopes());
        registry.register_local("echo", echo(), ToolSchema::new("echo", "Echo input"));
        let status = ToolSchema::new("status", "status").with_required_scopes(["admin"]);
        registry.register_builtin(status);
        assert!(registry.is_builtin("status"));

        assert!(registry.remove("status"));
        assert!(registry.remove("echo"));
        assert!(!registry.remove("echo"));
        assert!(registry.list_names().is_empty());
    }

    #[tokio::test]
    async fn failing_category_degrades_to_empty() {
        let registry = Arc::new(ToolRegistry::new(scopes()));
        registry.register_local(
            "reader",
            echo(),
            ToolSchema::new("reader", "reads").with_required_scopes(["files:read"]),
        );
        registry
            .register_tool_server(
                Arc::new(FakeServer::new("fs", &["ls"])),
                &policy(&["files:read"]),
            )
            .await
            .unwrap();

        let poisoner = Arc::clone(&registry);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.local.write().unwrap();
            panic!("poison local category");
        })
        .join();

        let granted = registry.available_for(["files:read"]);
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].name(), "ls");
    }

    #[tokio::test]
    async fn calls_are_checked_against_the_ambient_caller_and_audited() {
        let audit = Arc::new(CollectingAuditSink::new());
        let registry = ToolRegistry::new(scopes()).with_audit_sink(audit.clone());
        let server = Arc::new(FakeServer::new("fs", &["ls"]));
        registry
            .register_tool_server(server.clone(), &policy(&["files:read"]))
            .await
            .unwrap();
        registry.register_local("unscoped", echo(), ToolSchema::new("unscoped", "no scopes"));

        let err = registry.call_tool("ls", Value::Null).await.unwrap_err();
        let ToolError::PermissionDenied { missing, .. } = err else {
            panic!("expected denial, got {err:?}");
        };
        assert_eq!(missing, ["files:read"]);

        let guest = AuthContext::new("guest", AuthType::Bearer).with_scopes(["news:read"]);
        let err = with_auth(guest, registry.call_tool("ls", Value::Null)).await.unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
        assert_eq!(server.calls.load(Ordering::SeqCst), 0);

        with_auth(admin(), registry.call_tool("ls", Value::Null)).await.unwrap();
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);

        let err = with_auth(admin(), registry.invoke_local("unscoped", json!(1)))
            .await
            .unwrap_err();
        assert!(CapabilityError::from(err).is_permission_denied());

        let records = audit.records();
        let outcomes: Vec<(&str, bool)> =
            records.iter().map(|r| (r.user_id.as_str(), r.success)).collect();
        assert_eq!(
            outcomes,
            [(ANONYMOUS_USER, false), ("guest", false), ("ops", true), ("ops", false)]
        );
        assert!(records[2].held_scopes.contains(&"files:read".to_owned()));
        assert_eq!(records[2].capability_id, "ls");
    }
}
