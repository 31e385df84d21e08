//! Per-request authentication context and its ambient propagation.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// User id recorded for calls made without authentication.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Mechanism that produced an [`AuthContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Static API key.
    ApiKey,
    /// Opaque bearer token.
    Bearer,
    /// Signed JSON web token.
    Jwt,
    /// OAuth2 access token.
    #[serde(rename = "oauth2")]
    OAuth2,
    /// HTTP basic credentials.
    Basic,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ApiKey => "api_key",
            Self::Bearer => "bearer",
            Self::Jwt => "jwt",
            Self::OAuth2 => "oauth2",
            Self::Basic => "basic",
        };
        f.write_str(label)
    }
}

/// Authenticated caller identity with its expanded scope set.
///
/// Built per request and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    user_id: String,
    auth_type: AuthType,
    scopes: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
}

impl AuthContext {
    /// Creates a context for `user_id` with no scopes.
    #[must_use]
    pub fn new(user_id: impl Into<String>, auth_type: AuthType) -> Self {
        Self {
            user_id: user_id.into(),
            auth_type,
            scopes: BTreeSet::new(),
            expires_at: None,
            metadata: Map::new(),
        }
    }

    /// Sets the (already expanded) scope set.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the expiry instant.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Inserts a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns the authenticated user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the mechanism that authenticated the caller.
    #[must_use]
    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    /// Returns the expanded scope set.
    #[must_use]
    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    /// Returns the expiry instant, if any.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns the metadata map.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Returns true when `scope` is part of the expanded set.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Returns true when the context has passed its expiry instant.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= Utc::now())
    }
}

tokio::task_local! {
    static CURRENT_AUTH: AuthContext;
}

/// Runs `future` with `auth` installed as the ambient authentication.
///
/// The context is visible to everything awaited inside `future` on the same
/// task; work moved to `tokio::spawn` must be wrapped again.
pub async fn with_auth<F>(auth: AuthContext, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_AUTH.scope(auth, future).await
}

/// Returns the ambient authentication, or `None` when the caller is
/// unauthenticated or the context has expired.
#[must_use]
pub fn current_auth() -> Option<AuthContext> {
    let auth = CURRENT_AUTH.try_with(Clone::clone).ok()?;
    if auth.is_expired() {
        warn!(user_id = %auth.user_id(), "ignoring expired authentication context");
        return None;
    }
    Some(auth)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[tokio::test]
    async fn ambient_auth_is_scoped_to_future() {
        assert!(current_auth().is_none());

        let auth = AuthContext::new("alice", AuthType::ApiKey).with_scopes(["files:read"]);
        let seen = with_auth(auth, async { current_auth() }).await;

        let seen = seen.expect("auth inside scope");
        assert_eq!(seen.user_id(), "alice");
        assert!(seen.has_scope("files:read"));
        assert!(current_auth().is_none());
    }

    #[tokio::test]
    async fn expired_context_is_treated_as_unauthenticated() {
        let auth = AuthContext::new("bob", AuthType::Bearer)
            .with_expiry(Utc::now() - Duration::seconds(5));
        assert!(auth.is_expired());
        let seen = with_auth(auth, async { current_auth() }).await;
        assert!(seen.is_none());
    }

    #[test]
    fn auth_type_serialises_snake_case() {
        let value = serde_json::to_value(AuthType::OAuth2).unwrap();
        assert_eq!(value, "oauth2");
        assert_eq!(AuthType::ApiKey.to_string(), "api_key");
    }
}
