//! OpenAI-backed provider implementation.
//!
//! One concrete client serving both capability traits, selected once at
//! init. Every call is bounded by the operation timeout; transport and
//! server failures surface as transient provider errors for the retry
//! layer.

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use super::{ChatMessage, ChatRole, EmbeddingProvider, LlmProvider};
use crate::error::{Error, ProviderError, Result};
use crate::provider::retry::with_timeout;

/// Default embedding model.
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";

/// Default chat model.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// OpenAI client implementing [`EmbeddingProvider`] and [`LlmProvider`].
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    embed_model: String,
    chat_model: String,
    dimensions: usize,
    timeout: Duration,
}

impl OpenAiProvider {
    /// Creates a provider with default models and a 30 s timeout.
    #[must_use]
    pub fn new(api_key: &str, dimensions: usize) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            dimensions,
            timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the embedding model.
    #[must_use]
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    /// Overrides the chat model.
    #[must_use]
    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Maps conversation messages into the OpenAI request types.
fn map_messages(messages: &[ChatMessage]) -> Result<Vec<ChatCompletionRequestMessage>> {
    messages
        .iter()
        .map(|msg| {
            let mapped = match msg.role {
                ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(msg.content.as_str())
                    .build()
                    .map(ChatCompletionRequestMessage::System),
                ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.as_str())
                    .build()
                    .map(ChatCompletionRequestMessage::User),
                ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.as_str())
                    .build()
                    .map(ChatCompletionRequestMessage::Assistant),
            };
            mapped.map_err(|e| {
                Error::Provider(ProviderError::Upstream {
                    operation: "complete",
                    reason: e.to_string(),
                })
            })
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embed_model)
            .input(text)
            .build()
            .map_err(|e| {
                Error::Provider(ProviderError::Upstream {
                    operation: "embed",
                    reason: e.to_string(),
                })
            })?;

        let response = with_timeout("embed", self.timeout, async {
            self.client.embeddings().create(request).await.map_err(|e| {
                Error::Provider(ProviderError::Upstream {
                    operation: "embed",
                    reason: e.to_string(),
                })
            })
        })
        .await?;

        let vector = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                Error::Provider(ProviderError::Malformed {
                    operation: "embed",
                    raw: "empty embedding response".to_string(),
                })
            })?;

        if vector.len() != self.dimensions {
            return Err(Error::Storage(
                crate::error::StorageError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len(),
                },
            ));
        }
        Ok(vector)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .temperature(temperature)
            .max_tokens(max_tokens)
            .messages(map_messages(messages)?)
            .build()
            .map_err(|e| {
                Error::Provider(ProviderError::Upstream {
                    operation: "complete",
                    reason: e.to_string(),
                })
            })?;

        let response = with_timeout("complete", self.timeout, async {
            self.client.chat().create(request).await.map_err(|e| {
                Error::Provider(ProviderError::Upstream {
                    operation: "complete",
                    reason: e.to_string(),
                })
            })
        })
        .await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::debug!(chars = content.len(), "completion generated");
        Ok(content)
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("embed_model", &self.embed_model)
            .field("chat_model", &self.chat_model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let provider = OpenAiProvider::new("sk-test", 1536)
            .with_embed_model("text-embedding-3-large")
            .with_chat_model("gpt-4o")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(provider.embed_model, "text-embedding-3-large");
        assert_eq!(provider.chat_model, "gpt-4o");
        assert_eq!(provider.timeout, Duration::from_secs(5));
        assert_eq!(provider.dimensions, 1536);
    }

    #[test]
    fn test_map_messages_roles() {
        let mapped = map_messages(&[
            ChatMessage::system("a"),
            ChatMessage::user("b"),
            ChatMessage::assistant("c"),
        ])
        .unwrap();
        assert_eq!(mapped.len(), 3);
        assert!(matches!(mapped[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(mapped[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(
            mapped[2],
            ChatCompletionRequestMessage::Assistant(_)
        ));
    }
}
