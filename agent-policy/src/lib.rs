//! Scope enforcement primitives: hierarchy expansion, authentication context,
//! and audit sinks.

#![warn(missing_docs, clippy::pedantic)]

mod audit;
mod auth;
mod authenticator;
mod decision;
mod error;
mod scope;

pub use audit::{AuditRecord, AuditSink, CollectingAuditSink, TracingAuditSink};
pub use auth::{ANONYMOUS_USER, AuthContext, AuthType, current_auth, with_auth};
pub use authenticator::{Authenticator, Credentials, StaticCredentialAuthenticator};
pub use decision::AccessDecision;
pub use error::{PolicyError, PolicyResult};
pub use scope::{HierarchySummary, ScopeHierarchy, ScopeRequestCache, ScopeService};
