//! Capability dispatch for agents.
//!
//! The kernel owns the [`CapabilityRegistry`], which wraps every capability
//! in a scope-enforcing handler, an optional middleware stack and an
//! optional conversation-state layer. [`AppContext`] assembles the registry
//! and its collaborators from an [`agent_config::AgentConfig`], and the
//! [`Dispatcher`] turns a [`agent_primitives::Task`] into a reply by
//! consulting a chat model and executing the functions it requests.

#![warn(missing_docs, clippy::pedantic)]

mod app;
mod builtin;
mod capability;
mod dispatcher;
mod error;
mod layers;
mod registry;

pub use app::{AppContext, AppContextBuilder};
pub use builtin::{BuiltinProvider, CAPABILITIES, ECHO, STATUS};
pub use capability::{
    CapabilityContext, CapabilityExecutor, CapabilityProvider, DiscoveredCapability,
    ManifestProvider,
};
pub use dispatcher::{
    CANCELLED_REPLY, Dispatcher, DispatcherConfig, EMPTY_RESPONSE_REPLY, NO_MESSAGE_REPLY,
    PERMISSION_DENIED_REPLY, ReplyStream, fallback_reply,
};
pub use error::{KernelError, KernelResult};
pub use registry::{CapabilityRegistry, MiddlewareInfo, RegistrationOptions, StateInfo};
