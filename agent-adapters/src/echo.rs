//! Offline model that repeats the latest user message.

use async_trait::async_trait;
use futures::stream;

use crate::traits::{
    AdapterMetadata, AdapterResult, ChatChunk, ChatModel, ChatStream, MessageRole, ModelResponse,
    PromptMessage,
};

/// Deterministic [`ChatModel`] for local development and demos.
///
/// It never requests function calls, so the dispatcher always takes the
/// direct-response path with it. Streams emit one chunk per word.
#[derive(Debug, Clone)]
pub struct EchoModel {
    metadata: AdapterMetadata,
}

impl Default for EchoModel {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoModel {
    /// Creates the model.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: AdapterMetadata::new("echo", "echo-1"),
        }
    }
}

#[async_trait]
impl ChatModel for EchoModel {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn chat(&self, messages: &[PromptMessage]) -> AdapterResult<ModelResponse> {
        Ok(ModelResponse::text(echo(messages)))
    }

    async fn chat_stream(&self, messages: &[PromptMessage]) -> AdapterResult<ChatStream> {
        let text = echo(messages);
        let words: Vec<&str> = text.split_inclusive(' ').collect();
        let last = words.len().saturating_sub(1);
        let chunks: Vec<AdapterResult<ChatChunk>> = words
            .into_iter()
            .enumerate()
            .map(|(index, word)| Ok(ChatChunk::new(word, index == last)))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

fn echo(messages: &[PromptMessage]) -> String {
    let latest = messages
        .iter()
        .rev()
        .find(|message| message.role() == MessageRole::User)
        .map_or("", PromptMessage::content);
    format!("Echo: {latest}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FunctionSpec;

    #[tokio::test]
    async fn echoes_latest_user_message() {
        let model = EchoModel::new();
        let messages = [
            PromptMessage::system("sys"),
            PromptMessage::user("first"),
            PromptMessage::assistant("reply"),
            PromptMessage::user("second"),
        ];
        let response = model.chat(&messages).await.unwrap();
        assert_eq!(response.content, "Echo: second");
    }

    #[tokio::test]
    async fn streams_word_by_word() {
        use futures::StreamExt;

        let model = EchoModel::new();
        let stream = model.chat_stream(&[PromptMessage::user("hello there")]).await.unwrap();
        let chunks: Vec<ChatChunk> = stream.map(Result::unwrap).collect().await;
        let deltas: Vec<&str> = chunks.iter().map(|chunk| chunk.delta.as_str()).collect();
        assert_eq!(deltas, ["Echo: ", "hello ", "there"]);
        assert!(chunks.last().unwrap().done);
        assert!(!chunks[0].done);
    }

    #[tokio::test]
    async fn fallback_path_yields_no_calls_for_plain_text() {
        let model = EchoModel::new();
        let functions = [FunctionSpec::new("status", "Agent status", serde_json::json!({}))];
        let response = model
            .chat_with_functions(&[PromptMessage::user("hello")], &functions)
            .await
            .unwrap();
        assert!(!response.has_function_calls());
        assert!(!model.supports_function_calling());
    }
}
