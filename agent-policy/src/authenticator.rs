//! Credential authenticators producing [`AuthContext`] values.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::auth::{AuthContext, AuthType};
use crate::error::{PolicyError, PolicyResult};
use crate::scope::ScopeService;

/// Raw credentials extracted by the front-end layer.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Value of an API key header.
    ApiKey(String),
    /// Value of an `Authorization: Bearer` header.
    Bearer(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("Credentials::ApiKey(***)"),
            Self::Bearer(_) => f.write_str("Credentials::Bearer(***)"),
        }
    }
}

impl Credentials {
    /// Mechanism these credentials belong to.
    #[must_use]
    pub fn auth_type(&self) -> AuthType {
        match self {
            Self::ApiKey(_) => AuthType::ApiKey,
            Self::Bearer(_) => AuthType::Bearer,
        }
    }
}

/// Trait implemented by authentication strategies.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Mechanism handled by this authenticator.
    fn auth_type(&self) -> AuthType;

    /// Validates `credentials` and returns the caller's context.
    async fn authenticate(&self, credentials: &Credentials) -> PolicyResult<AuthContext>;
}

#[derive(Clone)]
struct Grant {
    secret: String,
    user_id: String,
    scopes: BTreeSet<String>,
}

/// Authenticator validating API keys or bearer tokens against a static
/// configured list.
///
/// Granted scopes are expanded through the [`ScopeService`] at
/// authentication time so downstream checks see the full implied set.
pub struct StaticCredentialAuthenticator {
    auth_type: AuthType,
    grants: Vec<Grant>,
    scopes: Arc<ScopeService>,
}

impl fmt::Debug for StaticCredentialAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentialAuthenticator")
            .field("auth_type", &self.auth_type)
            .field("grants", &self.grants.len())
            .finish_non_exhaustive()
    }
}

impl StaticCredentialAuthenticator {
    /// Creates an API key authenticator.
    #[must_use]
    pub fn api_keys(scopes: Arc<ScopeService>) -> Self {
        Self {
            auth_type: AuthType::ApiKey,
            grants: Vec::new(),
            scopes,
        }
    }

    /// Creates a bearer token authenticator.
    #[must_use]
    pub fn bearer_tokens(scopes: Arc<ScopeService>) -> Self {
        Self {
            auth_type: AuthType::Bearer,
            grants: Vec::new(),
            scopes,
        }
    }

    /// Registers a credential granting `scopes` to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Configuration`] if the secret is blank.
    pub fn grant<I, S>(
        mut self,
        secret: impl Into<String>,
        user_id: impl Into<String>,
        scopes: I,
    ) -> PolicyResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(PolicyError::Configuration {
                reason: "credential secret cannot be empty".into(),
            });
        }
        self.grants.push(Grant {
            secret,
            user_id: user_id.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        });
        Ok(self)
    }

    fn secret<'a>(&self, credentials: &'a Credentials) -> PolicyResult<&'a str> {
        match (self.auth_type, credentials) {
            (AuthType::ApiKey, Credentials::ApiKey(value))
            | (AuthType::Bearer, Credentials::Bearer(value)) => Ok(value),
            _ => Err(PolicyError::authentication(format!(
                "unsupported credentials for {} authenticator",
                self.auth_type
            ))),
        }
    }
}

#[async_trait]
impl Authenticator for StaticCredentialAuthenticator {
    fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    async fn authenticate(&self, credentials: &Credentials) -> PolicyResult<AuthContext> {
        let presented = self.secret(credentials)?;

        // Compare against every grant so timing does not reveal the match position.
        let mut matched: Option<&Grant> = None;
        for grant in &self.grants {
            if constant_time_eq(grant.secret.as_bytes(), presented.as_bytes()) && matched.is_none()
            {
                matched = Some(grant);
            }
        }

        let Some(grant) = matched else {
            warn!(auth_type = %self.auth_type, "credential rejected");
            return Err(PolicyError::authentication("invalid credentials"));
        };

        let scopes = self.scopes.expand(&grant.scopes);
        debug!(
            user_id = %grant.user_id,
            auth_type = %self.auth_type,
            scopes = scopes.len(),
            "caller authenticated"
        );
        Ok(AuthContext::new(grant.user_id.clone(), self.auth_type).with_scopes(scopes))
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeHierarchy;

    fn scopes() -> Arc<ScopeService> {
        Arc::new(ScopeService::with_hierarchy(ScopeHierarchy::from_edges([(
            "files:write",
            vec!["files:read"],
        )])))
    }

    #[tokio::test]
    async fn api_key_grants_expanded_scopes() {
        let authenticator = StaticCredentialAuthenticator::api_keys(scopes())
            .grant("sk-test-123", "svc-reporter", ["files:write"])
            .unwrap();

        let ctx = authenticator
            .authenticate(&Credentials::ApiKey("sk-test-123".into()))
            .await
            .unwrap();
        assert_eq!(ctx.user_id(), "svc-reporter");
        assert_eq!(ctx.auth_type(), AuthType::ApiKey);
        assert!(ctx.has_scope("files:read"));
    }

    #[tokio::test]
    async fn unknown_or_mismatched_credentials_fail() {
        let authenticator = StaticCredentialAuthenticator::bearer_tokens(scopes())
            .grant("token-abc", "user-1", ["files:read"])
            .unwrap();

        let err = authenticator
            .authenticate(&Credentials::Bearer("token-xyz".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::AuthenticationFailed { .. }));

        let err = authenticator
            .authenticate(&Credentials::ApiKey("token-abc".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::AuthenticationFailed { .. }));
    }

    #[test]
    fn blank_secret_is_rejected() {
        let result = StaticCredentialAuthenticator::api_keys(scopes()).grant(" ", "u", ["s"]);
        assert!(matches!(result, Err(PolicyError::Configuration { .. })));
    }

    #[test]
    fn debug_hides_secrets() {
        let rendered = format!("{:?}", Credentials::ApiKey("secret".into()));
        assert!(!rendered.contains("secret"));
    }
}
