//! Core shared types for capability-dispatching agents.

#![warn(missing_docs, clippy::pedantic)]

mod capability;
mod error;
mod manifest;
mod task;

/// Capability descriptors and supporting builders.
pub use capability::{Capability, CapabilityBuilder, CapabilityId};
/// Error types shared across the runtime.
pub use error::{CapabilityError, CapabilityResult, Error, Result};
/// Plugin metadata used by static capability discovery.
pub use manifest::{PluginManifest, PluginManifestBuilder};
/// Inbound task and message model.
pub use task::{MessagePart, MessageRole, Task, TaskMessage};
