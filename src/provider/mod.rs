//! External collaborator interfaces.
//!
//! Every outside service the engine depends on is reached through a
//! narrow capability trait: embeddings, completions, ticketing, the
//! repository source, and credential minting. Concrete implementations
//! are selected once at init and threaded through component
//! constructors; nothing in the core dispatches on provider kind.

pub mod cache;
pub mod git;
pub mod limit;
pub mod openai;
pub mod retry;

pub use cache::EnrichmentCache;
pub use git::GitCliSource;
pub use limit::RateLimiter;
pub use openai::OpenAiProvider;
pub use retry::{backoff_delay, with_retry, with_timeout};

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    /// System instruction.
    System,
    /// User turn.
    User,
    /// Assistant turn.
    Assistant,
}

/// One message in an LLM conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Message role.
    pub role: ChatRole,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Embedding generation capability.
///
/// The dimension is stable for the lifetime of a deployment; every
/// stored vector has exactly `dimensions()` components.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns a transient provider error on timeout or upstream
    /// failure.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Chat completion capability.
///
/// Output may be malformed relative to any requested schema; consumers
/// own the coercion.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &'static str;

    /// Generates a completion from messages.
    ///
    /// # Errors
    ///
    /// Returns a transient provider error on timeout or upstream
    /// failure.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

/// Ticketing capability for remediation tasks.
#[async_trait]
pub trait TicketingSystem: Send + Sync {
    /// Creates an issue and returns its ticket ID.
    ///
    /// Callers enforce at-most-once semantics per finding; the
    /// collaborator itself may be invoked at most once per natural key.
    ///
    /// # Errors
    ///
    /// Returns a transient provider error on upstream failure.
    async fn create_issue(
        &self,
        project: &str,
        title: &str,
        body: &str,
        priority: &str,
    ) -> Result<String>;
}

/// Repository access capability.
#[async_trait]
pub trait RepoSource: Send + Sync {
    /// Clones `full_name` into `dest` and returns the checked-out
    /// commit SHA.
    ///
    /// A shallow clone (depth 1) of the default branch when
    /// `commit_sha` is `None`; depth 50 plus an explicit checkout when
    /// a SHA is requested. The credential is an opaque bearer token.
    ///
    /// # Errors
    ///
    /// Returns a transient provider error when the clone or checkout
    /// fails or times out.
    async fn clone_repo(
        &self,
        full_name: &str,
        credential: &str,
        commit_sha: Option<&str>,
        dest: &Path,
    ) -> Result<String>;
}

/// Short-lived repository credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// The opaque bearer secret.
    pub secret: String,
    /// Unix timestamp after which the token is invalid.
    pub expires_at: i64,
}

/// Credential minting capability, keyed by installation.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Mints a fresh read credential for an installation.
    ///
    /// # Errors
    ///
    /// Returns a fatal credential error when minting fails.
    async fn mint(&self, installation_id: i64) -> Result<AccessToken>;
}

/// The full collaborator bundle threaded through the engine.
///
/// Owned by the process entry point; components borrow what they need.
#[derive(Clone)]
pub struct Providers {
    /// Embedding provider.
    pub embeddings: std::sync::Arc<dyn EmbeddingProvider>,
    /// LLM provider.
    pub llm: std::sync::Arc<dyn LlmProvider>,
    /// Ticketing collaborator.
    pub tickets: std::sync::Arc<dyn TicketingSystem>,
    /// Repository source.
    pub repos: std::sync::Arc<dyn RepoSource>,
    /// Credential minting.
    pub tokens: std::sync::Arc<dyn TokenSource>,
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("llm", &self.llm.name())
            .field("dimensions", &self.embeddings.dimensions())
            .finish_non_exhaustive()
    }
}

/// [`TokenSource`] backed by one long-lived personal access token.
///
/// For deployments without a GitHub App installation; the token never
/// expires from the engine's point of view.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Wraps a fixed token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn mint(&self, _installation_id: i64) -> Result<AccessToken> {
        Ok(AccessToken {
            secret: self.token.clone(),
            expires_at: i64::MAX,
        })
    }
}

/// [`TicketingSystem`] stand-in for deployments without a ticketing
/// backend configured.
///
/// Issues are logged, not filed; the returned IDs are stable per call
/// so the idempotency path behaves as it would against a real backend.
#[derive(Debug, Default)]
pub struct DryRunTicketing;

#[async_trait]
impl TicketingSystem for DryRunTicketing {
    async fn create_issue(
        &self,
        project: &str,
        title: &str,
        _body: &str,
        priority: &str,
    ) -> Result<String> {
        let ticket_id = format!("{project}-{}", uuid::Uuid::new_v4().simple());
        tracing::info!(%ticket_id, title, priority, "dry-run ticket created");
        Ok(ticket_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let msg = ChatMessage::system("be strict");
        assert_eq!(msg.role, ChatRole::System);
        assert_eq!(msg.content, "be strict");

        assert_eq!(ChatMessage::user("hi").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("ok").role, ChatRole::Assistant);
    }
}
