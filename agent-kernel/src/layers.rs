//! Registry-owned layers around a capability executor.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use agent_memory::ConversationContext;
use agent_middleware::{Handler, Interceptor, Invocation, Next};
use agent_policy::{ANONYMOUS_USER, AuditRecord, AuditSink, AuthContext, ScopeService, current_auth};
use agent_primitives::{CapabilityError, CapabilityResult};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::capability::{CapabilityContext, CapabilityExecutor};

/// Scope requirements of one capability.
///
/// Shared by the terminal [`AuthLayer`] and the [`ScopeGuard`] placed outside
/// the middleware stack, so a short-circuiting layer such as a cache never
/// answers a caller the executor would have refused.
pub(crate) struct ScopeGate {
    capability_id: String,
    required_scopes: BTreeSet<String>,
    auth_enabled: bool,
    scopes: Arc<ScopeService>,
    audit: Arc<dyn AuditSink>,
}

impl fmt::Debug for ScopeGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGate")
            .field("capability_id", &self.capability_id)
            .field("required_scopes", &self.required_scopes)
            .field("auth_enabled", &self.auth_enabled)
            .finish_non_exhaustive()
    }
}

impl ScopeGate {
    pub(crate) fn new(
        capability_id: impl Into<String>,
        required_scopes: BTreeSet<String>,
        auth_enabled: bool,
        scopes: Arc<ScopeService>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            capability_id: capability_id.into(),
            required_scopes,
            auth_enabled,
            scopes,
            audit,
        }
    }

    /// Whether callers are checked at all.
    pub(crate) fn enforces(&self) -> bool {
        self.auth_enabled && !self.required_scopes.is_empty()
    }

    /// Rejects a caller lacking a required scope. Denials are audited here.
    fn authorize(&self, auth: Option<&AuthContext>, started: Instant) -> CapabilityResult<()> {
        if !self.enforces() {
            return Ok(());
        }
        let held = auth.map(|a| a.scopes().clone()).unwrap_or_default();
        let decision = self.scopes.validate(&held, &self.required_scopes);
        if decision.is_allowed() {
            return Ok(());
        }
        debug!(
            capability_id = %self.capability_id,
            user_id = auth.map_or(ANONYMOUS_USER, AuthContext::user_id),
            "capability access denied"
        );
        self.audit(auth, false, started);
        Err(CapabilityError::PermissionDenied {
            subject: self.capability_id.clone(),
            missing: decision.into_missing(),
        })
    }

    fn audit(&self, auth: Option<&AuthContext>, success: bool, started: Instant) {
        let record = AuditRecord {
            capability_id: self.capability_id.clone(),
            user_id: auth.map_or_else(|| ANONYMOUS_USER.to_owned(), |a| a.user_id().to_owned()),
            held_scopes: auth
                .map(|a| self.scopes.expand(a.scopes()).into_iter().collect())
                .unwrap_or_default(),
            required_scopes: self.required_scopes.iter().cloned().collect(),
            success,
            duration: started.elapsed(),
            recorded_at: Utc::now(),
        };
        if let Err(err) = self.audit.record(&record) {
            warn!(capability_id = %self.capability_id, %err, "audit sink failed");
        }
    }
}

/// Terminal handler enforcing required scopes before the executor runs.
///
/// Sits innermost so that a denial is never retried and auditing measures
/// only the executor. Every call that reaches it is audited.
pub(crate) struct AuthLayer {
    gate: Arc<ScopeGate>,
    executor: Arc<dyn CapabilityExecutor>,
}

impl fmt::Debug for AuthLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthLayer")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl AuthLayer {
    pub(crate) fn new(gate: Arc<ScopeGate>, executor: Arc<dyn CapabilityExecutor>) -> Self {
        Self { gate, executor }
    }

    pub(crate) fn gate(&self) -> &Arc<ScopeGate> {
        &self.gate
    }

    pub(crate) fn required_scopes(&self) -> &BTreeSet<String> {
        &self.gate.required_scopes
    }

    pub(crate) fn auth_enabled(&self) -> bool {
        self.gate.auth_enabled
    }

    fn context(invocation: &Invocation, auth: Option<AuthContext>) -> CapabilityContext {
        CapabilityContext::new(
            Arc::clone(invocation.task()),
            invocation.arguments().clone(),
            auth,
            invocation.state().cloned(),
        )
    }
}

#[async_trait]
impl Handler for AuthLayer {
    async fn handle(&self, invocation: Invocation) -> CapabilityResult<String> {
        let auth = current_auth();
        let started = Instant::now();
        self.gate.authorize(auth.as_ref(), started)?;

        let result = self.executor.execute(Self::context(&invocation, auth.clone())).await;
        self.gate.audit(auth.as_ref(), result.is_ok(), started);
        result
    }
}

/// Scope check wrapped outside the middleware stack.
pub(crate) struct ScopeGuard {
    gate: Arc<ScopeGate>,
}

impl ScopeGuard {
    pub(crate) fn new(gate: Arc<ScopeGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Interceptor for ScopeGuard {
    fn name(&self) -> &'static str {
        "scope_guard"
    }

    async fn invoke(&self, invocation: Invocation, next: Next<'_>) -> CapabilityResult<String> {
        self.gate.authorize(current_auth().as_ref(), Instant::now())?;
        next.run(invocation).await
    }
}

/// Outermost layer binding the conversation state to the invocation.
pub(crate) struct StateInterceptor {
    context: ConversationContext,
}

impl StateInterceptor {
    pub(crate) fn new(context: ConversationContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Interceptor for StateInterceptor {
    fn name(&self) -> &'static str {
        "stateful"
    }

    async fn invoke(&self, invocation: Invocation, next: Next<'_>) -> CapabilityResult<String> {
        let handle = self.context.handle(invocation.task().conversation_id());
        next.run(invocation.with_state(handle)).await
    }
}

#[cfg(test)]
mod tests {
    use agent_memory::InMemoryStorage;
    use agent_middleware::Pipeline;
    use agent_policy::{AuthType, CollectingAuditSink, ScopeHierarchy, with_auth};
    use agent_primitives::Task;
    use serde_json::Value;

    use super::*;

    fn scopes() -> Arc<ScopeService> {
        Arc::new(ScopeService::with_hierarchy(ScopeHierarchy::from_edges([(
            "admin",
            ["read"],
        )])))
    }

    fn gate(required: &[&str], audit: Arc<CollectingAuditSink>) -> Arc<ScopeGate> {
        Arc::new(ScopeGate::new(
            "secret",
            required.iter().map(|s| (*s).to_owned()).collect(),
            true,
            scopes(),
            audit,
        ))
    }

    fn layer(required: &[&str], audit: Arc<CollectingAuditSink>) -> AuthLayer {
        let executor = |_: CapabilityContext| async { Ok::<_, CapabilityError>("done".to_owned()) };
        AuthLayer::new(gate(required, audit), Arc::new(executor))
    }

    /// Answers without reaching the handler, like a warm cache.
    struct Canned;

    #[async_trait]
    impl Interceptor for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn invoke(&self, _: Invocation, _: Next<'_>) -> CapabilityResult<String> {
            Ok("cached".to_owned())
        }
    }

    fn invocation() -> Invocation {
        Invocation::new("secret", Arc::new(Task::new("t-1").with_context_id("c-1")))
    }

    #[tokio::test]
    async fn expanded_scopes_grant_access_and_are_audited() {
        let audit = Arc::new(CollectingAuditSink::new());
        let layer = layer(&["read"], Arc::clone(&audit));
        let auth = AuthContext::new("alice", AuthType::ApiKey).with_scopes(["admin"]);

        let result = with_auth(auth, layer.handle(invocation())).await;
        assert_eq!(result.unwrap(), "done");

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert_eq!(records[0].user_id, "alice");
        assert!(records[0].held_scopes.contains(&"read".to_owned()));
    }

    #[tokio::test]
    async fn missing_auth_is_denied() {
        let audit = Arc::new(CollectingAuditSink::new());
        let layer = layer(&["read"], Arc::clone(&audit));

        let err = layer.handle(invocation()).await.unwrap_err();
        assert!(err.is_permission_denied());
        assert!(!audit.records()[0].success);
        assert_eq!(audit.records()[0].user_id, ANONYMOUS_USER);
    }

    #[tokio::test]
    async fn unscoped_capabilities_skip_validation_but_are_audited() {
        let audit = Arc::new(CollectingAuditSink::new());
        let layer = layer(&[], Arc::clone(&audit));
        assert_eq!(layer.handle(invocation()).await.unwrap(), "done");

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert_eq!(records[0].user_id, ANONYMOUS_USER);
        assert!(records[0].required_scopes.is_empty());
    }

    #[tokio::test]
    async fn guard_rejects_before_short_circuiting_layers() {
        let audit = Arc::new(CollectingAuditSink::new());
        let layer = layer(&["read"], Arc::clone(&audit));
        let pipeline = Pipeline::builder(Arc::new(layer))
            .layer(Arc::new(Canned))
            .wrap(Arc::new(ScopeGuard::new(gate(&["read"], Arc::clone(&audit)))))
            .build();

        let err = pipeline.run(invocation()).await.unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(audit.records().len(), 1);

        let reader = AuthContext::new("bob", AuthType::Bearer).with_scopes(["read"]);
        assert_eq!(with_auth(reader, pipeline.run(invocation())).await.unwrap(), "cached");
        assert_eq!(pipeline.interceptor_names(), vec!["scope_guard", "canned"]);
    }

    #[tokio::test]
    async fn state_interceptor_binds_conversation() {
        let context = ConversationContext::new(Arc::new(InMemoryStorage::new()));
        let executor = |ctx: CapabilityContext| async move {
            let state = ctx.state().ok_or_else(|| CapabilityError::execution("no state"))?;
            state
                .set_variable("seen", Value::Bool(true))
                .await
                .map_err(|e| CapabilityError::execution(e.to_string()))?;
            Ok::<_, CapabilityError>(state.context_id().to_owned())
        };
        let gate = ScopeGate::new(
            "stateful",
            BTreeSet::new(),
            true,
            scopes(),
            Arc::new(CollectingAuditSink::new()),
        );
        let handler = AuthLayer::new(Arc::new(gate), Arc::new(executor));
        let pipeline = Pipeline::builder(Arc::new(handler))
            .wrap(Arc::new(StateInterceptor::new(context.clone())))
            .build();

        assert_eq!(pipeline.run(invocation()).await.unwrap(), "c-1");
        assert_eq!(
            context.get_variable("c-1", "seen").await.unwrap(),
            Some(Value::Bool(true))
        );
        assert_eq!(pipeline.interceptor_names(), vec!["stateful"]);
    }
}
