//! Tool registry for functions offered to language models.
//!
//! Three categories are tracked: local functions with in-process handlers,
//! built-in framework functions, and tools enumerated from external tool
//! servers. [`ToolRegistry::available_for`] is the security boundary: it
//! filters every category by the caller's scopes and never grants an entry
//! that has no required scopes configured.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod registry;
mod schema;
mod server;

pub use error::{ToolError, ToolResult};
pub use registry::{Tool, ToolRegistry};
pub use schema::{MAX_FUNCTION_NAME_LEN, ToolOrigin, ToolSchema, sanitize_function_name};
pub use server::{RemoteTool, ToolServerConnection, ToolServerPolicy};
