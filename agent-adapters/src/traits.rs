//! Shared model adapter traits and data structures.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use agent_primitives::CapabilityError;
use async_trait::async_trait;
use futures::{Stream, stream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::fallback;

/// Result alias used by model adapters.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Streaming response emitted by [`ChatModel::chat_stream`].
pub type ChatStream = Pin<Box<dyn Stream<Item = AdapterResult<ChatChunk>> + Send>>;

/// Error type shared by adapter implementations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Adapter is misconfigured or missing credentials.
    #[error("adapter not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },

    /// The supplied request was invalid for the target model.
    #[error("invalid chat request: {reason}")]
    InvalidRequest {
        /// Reason describing why the request could not be processed.
        reason: String,
    },

    /// Transport-level failures (network, protocol, etc.).
    #[error("adapter transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// The provider rejected the request due to rate limiting.
    #[error("adapter rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Suggested delay before retrying.
        retry_after: Option<Duration>,
    },

    /// The provider returned a malformed response.
    #[error("adapter response error: {reason}")]
    Response {
        /// Additional context about the response failure.
        reason: String,
    },
}

impl AdapterError {
    /// Convenience constructor for invalid requests.
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}

impl From<AdapterError> for CapabilityError {
    fn from(value: AdapterError) -> Self {
        CapabilityError::provider(value.to_string())
    }
}

/// Minimal metadata describing a model adapter instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterMetadata {
    provider: &'static str,
    model: String,
}

impl AdapterMetadata {
    /// Creates metadata for the supplied provider and model identifier.
    #[must_use]
    pub fn new(provider: &'static str, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Returns the provider identifier (e.g., "openai").
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        self.provider
    }

    /// Returns the configured model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Roles supported in chat-style prompts.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System messages steer the assistant behaviour.
    System,
    /// User-authored content.
    User,
    /// Assistant (model) responses.
    Assistant,
    /// Function results returned to the model.
    Function,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Function => "function",
        })
    }
}

/// Function invocation requested by a model.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FunctionCall {
    /// Function name as presented to the model.
    pub name: String,
    /// Arguments object.
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Provider correlation id, when the protocol has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl FunctionCall {
    /// Creates a call without a correlation id.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            call_id: None,
        }
    }

    /// Arguments as a JSON object value.
    #[must_use]
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// Function offered to the model.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FunctionSpec {
    /// Name the model uses to call it.
    pub name: String,
    /// Human-readable purpose.
    pub description: String,
    /// JSON schema of the parameters.
    pub parameters: Value,
}

impl FunctionSpec {
    /// Creates a spec.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Represents an instruction or message in a chat-style prompt.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PromptMessage {
    role: MessageRole,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    function_calls: Vec<FunctionCall>,
}

impl PromptMessage {
    /// Creates a new prompt message.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            function_calls: Vec::new(),
        }
    }

    /// Shorthand for a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Shorthand for a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Shorthand for an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Result of the function `name`, sent back in the native protocol.
    #[must_use]
    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(MessageRole::Function, content)
        }
    }

    /// Attaches the calls an assistant message requested.
    #[must_use]
    pub fn with_function_calls(mut self, calls: Vec<FunctionCall>) -> Self {
        self.function_calls = calls;
        self
    }

    /// Returns the message role.
    #[must_use]
    pub const fn role(&self) -> MessageRole {
        self.role
    }

    /// Returns the message content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Function name for function-role messages.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Calls requested by an assistant message.
    #[must_use]
    pub fn function_calls(&self) -> &[FunctionCall] {
        &self.function_calls
    }

    pub(crate) fn append_content(&mut self, extra: &str) {
        self.content.push_str(extra);
    }
}

/// Model output for one chat call.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ModelResponse {
    /// Text content; may be empty when only calls were requested.
    pub content: String,
    /// Calls the model requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionCall>,
}

impl ModelResponse {
    /// Plain text response.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            function_calls: Vec::new(),
        }
    }

    /// Response requesting function calls.
    #[must_use]
    pub fn calls(content: impl Into<String>, function_calls: Vec<FunctionCall>) -> Self {
        Self {
            content: content.into(),
            function_calls,
        }
    }

    /// Whether any calls were requested.
    #[must_use]
    pub fn has_function_calls(&self) -> bool {
        !self.function_calls.is_empty()
    }
}

/// Streaming chunk returned by the adapter.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatChunk {
    /// Partial text emitted by the provider.
    pub delta: String,
    /// Whether the generation is complete.
    pub done: bool,
}

impl ChatChunk {
    /// Creates a new chunk.
    #[must_use]
    pub fn new(delta: impl Into<String>, done: bool) -> Self {
        Self {
            delta: delta.into(),
            done,
        }
    }
}

/// Provider-agnostic chat model.
///
/// Providers without native function calling inherit the textual fallback:
/// functions are described in the system message and the reply is scanned
/// for `FUNCTION_CALL:` lines.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns basic metadata describing the adapter instance.
    fn metadata(&self) -> &AdapterMetadata;

    /// Whether [`Self::chat_with_functions`] uses the provider's native
    /// protocol.
    fn supports_function_calling(&self) -> bool {
        false
    }

    /// Produces a direct response.
    async fn chat(&self, messages: &[PromptMessage]) -> AdapterResult<ModelResponse>;

    /// Produces a response that may request calls to `functions`.
    async fn chat_with_functions(
        &self,
        messages: &[PromptMessage],
        functions: &[FunctionSpec],
    ) -> AdapterResult<ModelResponse> {
        let messages = fallback::inject_functions(messages, functions);
        let mut response = self.chat(&messages).await?;
        if response.function_calls.is_empty() {
            response.function_calls = fallback::parse_function_calls(&response.content);
        }
        Ok(response)
    }

    /// Streams a direct response.
    ///
    /// The default yields the whole [`Self::chat`] reply as one final chunk.
    async fn chat_stream(&self, messages: &[PromptMessage]) -> AdapterResult<ChatStream> {
        let response = self.chat(messages).await?;
        let chunk = ChatChunk::new(response.content, true);
        Ok(Box::pin(stream::once(async move { Ok(chunk) })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_result_carries_name() {
        let message = PromptMessage::function_result("weather", "sunny");
        assert_eq!(message.role(), MessageRole::Function);
        assert_eq!(message.name(), Some("weather"));
        assert_eq!(message.content(), "sunny");
    }

    struct Fixed(AdapterMetadata);

    #[async_trait]
    impl ChatModel for Fixed {
        fn metadata(&self) -> &AdapterMetadata {
            &self.0
        }

        async fn chat(&self, _messages: &[PromptMessage]) -> AdapterResult<ModelResponse> {
            Ok(ModelResponse::text("all at once"))
        }
    }

    #[tokio::test]
    async fn default_stream_yields_one_final_chunk() {
        use futures::StreamExt;

        let model = Fixed(AdapterMetadata::new("fixed", "fixed-1"));
        let stream = model.chat_stream(&[PromptMessage::user("hi")]).await.unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), &ChatChunk::new("all at once", true));
    }

    #[test]
    fn adapter_errors_map_to_provider_failures() {
        let err: CapabilityError = AdapterError::transport("connection reset").into();
        assert!(matches!(
            err,
            CapabilityError::Provider { reason } if reason.contains("connection reset")
        ));
    }
}
