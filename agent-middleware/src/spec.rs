//! Typed middleware declarations.

use agent_primitives::{CapabilityError, CapabilityResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::CacheConfig;
use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryConfig;

/// One entry of a middleware stack, outermost first when listed.
#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareSpec {
    /// Token-bucket rate limiting.
    RateLimited(RateLimitConfig),
    /// Result caching.
    Cached(CacheConfig),
    /// Retry with exponential backoff.
    Retryable(RetryConfig),
    /// Execution timing.
    Timed,
}

impl MiddlewareSpec {
    /// Canonical layer name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Cached(_) => "cached",
            Self::Retryable(_) => "retryable",
            Self::Timed => "timed",
        }
    }

    /// Converts a `{name, params}` configuration entry.
    ///
    /// Null or absent params select the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Configuration`] for unknown names or params
    /// that do not match the layer's configuration shape.
    pub fn from_entry(name: &str, params: &Value) -> CapabilityResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rate_limited" | "rate_limit" | "rate_limiting" => {
                parse_params(name, params).map(Self::RateLimited)
            }
            "cached" | "cache" | "caching" => parse_params(name, params).map(Self::Cached),
            "retryable" | "retry" => parse_params(name, params).map(Self::Retryable),
            "timed" | "timing" => Ok(Self::Timed),
            other => Err(CapabilityError::configuration(format!(
                "unknown middleware `{other}`"
            ))),
        }
    }
}

fn parse_params<T>(name: &str, params: &Value) -> CapabilityResult<T>
where
    T: DeserializeOwned + Default,
{
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|err| {
        CapabilityError::configuration(format!("invalid params for middleware `{name}`: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::rate_limit::EnforcementMode;

    #[test]
    fn entries_parse_with_aliases_and_defaults() {
        let spec = MiddlewareSpec::from_entry(
            "rate_limiting",
            &json!({"requests_per_minute": 10, "enforcement": "soft"}),
        )
        .unwrap();
        let MiddlewareSpec::RateLimited(config) = spec else {
            panic!("expected rate limit");
        };
        assert_eq!(config.requests_per_minute, 10);
        assert_eq!(config.enforcement, EnforcementMode::Soft);

        let cached = MiddlewareSpec::from_entry("cached", &json!({"ttl": 30})).unwrap();
        assert_eq!(
            cached,
            MiddlewareSpec::Cached(CacheConfig {
                default_ttl: 30,
                ..CacheConfig::default()
            })
        );

        let retry = MiddlewareSpec::from_entry("retryable", &Value::Null).unwrap();
        assert_eq!(retry, MiddlewareSpec::Retryable(RetryConfig::default()));
        assert_eq!(MiddlewareSpec::from_entry("timed", &json!({})).unwrap().kind(), "timed");
    }

    #[test]
    fn unknown_names_and_bad_params_are_configuration_errors() {
        assert!(matches!(
            MiddlewareSpec::from_entry("logged", &Value::Null),
            Err(CapabilityError::Configuration { .. })
        ));
        assert!(matches!(
            MiddlewareSpec::from_entry("retryable", &json!({"max_attempts": "many"})),
            Err(CapabilityError::Configuration { .. })
        ));
    }
}
