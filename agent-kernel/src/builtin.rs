//! Capabilities every agent offers regardless of plugins.

use std::sync::{Arc, Weak};

use agent_primitives::{
    Capability, CapabilityBuilder, CapabilityError, CapabilityId, CapabilityResult,
};
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::capability::{
    CapabilityContext, CapabilityExecutor, CapabilityProvider, DiscoveredCapability,
};
use crate::registry::CapabilityRegistry;

/// Id of the status capability.
pub const STATUS: &str = "status";
/// Id of the capability listing capability.
pub const CAPABILITIES: &str = "capabilities";
/// Id of the echo capability.
pub const ECHO: &str = "echo";

struct StatusExecutor {
    agent_name: String,
}

#[async_trait]
impl CapabilityExecutor for StatusExecutor {
    async fn execute(&self, context: CapabilityContext) -> CapabilityResult<String> {
        Ok(format!(
            "{} is operational and ready to process tasks. Task ID: {}",
            self.agent_name,
            context.task().id()
        ))
    }
}

struct ListingExecutor {
    agent_name: String,
    registry: Weak<CapabilityRegistry>,
}

#[async_trait]
impl CapabilityExecutor for ListingExecutor {
    async fn execute(&self, _context: CapabilityContext) -> CapabilityResult<String> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| CapabilityError::execution("capability registry is gone"))?;
        let lines: Vec<String> = registry.list().into_iter().map(|id| format!("- {id}")).collect();
        Ok(format!("{} capabilities:\n{}", self.agent_name, lines.join("\n")))
    }
}

struct EchoExecutor;

#[async_trait]
impl CapabilityExecutor for EchoExecutor {
    async fn execute(&self, context: CapabilityContext) -> CapabilityResult<String> {
        let message = context
            .arguments()
            .get("message")
            .or_else(|| context.task().metadata().get("message"))
            .and_then(Value::as_str);
        Ok(match message {
            Some(message) => format!("Echo: {message}"),
            None => "Echo: No message provided".to_owned(),
        })
    }
}

fn descriptor(id: &str, description: &str) -> Option<Capability> {
    let built = Capability::builder(CapabilityId::new(id).ok()?)
        .name(id)
        .map(|builder| builder.description(description))
        .and_then(CapabilityBuilder::build);
    match built {
        Ok(capability) => Some(capability),
        Err(err) => {
            warn!(capability_id = id, %err, "invalid built-in descriptor");
            None
        }
    }
}

/// Provider of `status`, `capabilities` and `echo`.
///
/// The descriptors carry no scopes; scopes configured for these ids apply
/// when they are registered through discovery.
#[derive(Debug, Clone)]
pub struct BuiltinProvider {
    agent_name: String,
    registry: Weak<CapabilityRegistry>,
}

impl BuiltinProvider {
    /// Creates the provider; the listing capability reads `registry`.
    #[must_use]
    pub fn new(agent_name: impl Into<String>, registry: &Arc<CapabilityRegistry>) -> Self {
        Self {
            agent_name: agent_name.into(),
            registry: Arc::downgrade(registry),
        }
    }
}

impl CapabilityProvider for BuiltinProvider {
    fn name(&self) -> &str {
        "builtin"
    }

    fn discover(&self) -> Vec<DiscoveredCapability> {
        let status = descriptor(STATUS, "Get agent status").map(|capability| {
            DiscoveredCapability::new(
                capability,
                StatusExecutor {
                    agent_name: self.agent_name.clone(),
                },
            )
        });
        let listing = descriptor(CAPABILITIES, "List agent capabilities").map(|capability| {
            DiscoveredCapability::new(
                capability,
                ListingExecutor {
                    agent_name: self.agent_name.clone(),
                    registry: Weak::clone(&self.registry),
                },
            )
        });
        let echo = descriptor(ECHO, "Echo test capability")
            .map(|capability| DiscoveredCapability::new(capability, EchoExecutor));
        [status, listing, echo].into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use agent_middleware::MiddlewareResources;
    use agent_policy::{CollectingAuditSink, ScopeService};
    use agent_primitives::Task;
    use serde_json::json;

    use super::*;

    fn registry() -> Arc<CapabilityRegistry> {
        let registry = Arc::new(CapabilityRegistry::new(
            Arc::new(ScopeService::new()),
            Arc::new(CollectingAuditSink::new()),
            Arc::new(MiddlewareResources::new()),
        ));
        let provider = BuiltinProvider::new("Weather Bot", &registry);
        assert_eq!(registry.register_provider(&[&provider]).unwrap(), 3);
        registry
    }

    #[tokio::test]
    async fn status_reports_task_id() {
        let registry = registry();
        let reply = registry.execute(STATUS, &Task::new("t-42")).await.unwrap();
        assert_eq!(
            reply,
            "Weather Bot is operational and ready to process tasks. Task ID: t-42"
        );
    }

    #[tokio::test]
    async fn listing_is_sorted() {
        let registry = registry();
        let reply = registry.execute(CAPABILITIES, &Task::new("t")).await.unwrap();
        assert_eq!(
            reply,
            "Weather Bot capabilities:\n- capabilities\n- echo\n- status"
        );
    }

    #[tokio::test]
    async fn echo_prefers_arguments_then_metadata() {
        let registry = registry();
        let task = Arc::new(Task::new("t").with_metadata("message", json!("from metadata")));
        let reply = registry
            .execute_with(ECHO, Arc::clone(&task), json!({"message": "hi"}))
            .await
            .unwrap();
        assert_eq!(reply, "Echo: hi");
        let reply = registry.execute(ECHO, &task).await.unwrap();
        assert_eq!(reply, "Echo: from metadata");
        let reply = registry.execute(ECHO, &Task::new("t")).await.unwrap();
        assert_eq!(reply, "Echo: No message provided");
    }
}
