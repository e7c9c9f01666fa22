use futures::stream::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

use crate::models::chat::ChatMessage;

/// Lazy sequence of reply fragments from a streaming completion
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Completion provider is not configured")]
    NotConfigured,

    #[error("Failed to reach completion provider: {0}")]
    Transport(String),

    #[error("Completion provider returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Invalid completion payload: {0}")]
    Decode(String),

    #[error("Completion provider returned no choices")]
    EmptyReply,

    #[error("Completion timed out after {0:?}")]
    Timeout(Duration),
}

impl CompletionError {
    /// Stable code surfaced to API callers
    pub fn code(&self) -> &'static str {
        match self {
            CompletionError::NotConfigured => "COMPLETION_NOT_CONFIGURED",
            CompletionError::Transport(_) => "COMPLETION_UNREACHABLE",
            CompletionError::Upstream { .. } => "COMPLETION_UPSTREAM_ERROR",
            CompletionError::Decode(_) | CompletionError::EmptyReply => "COMPLETION_INVALID_REPLY",
            CompletionError::Timeout(_) => "COMPLETION_TIMEOUT",
        }
    }
}

/// Produces model text from an ordered message history.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CompletionClient: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;

    async fn stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream, CompletionError>;
}

/// Stand-in used when no credential is configured and the provider is optional.
pub struct UnconfiguredClient;

#[async_trait::async_trait]
impl CompletionClient for UnconfiguredClient {
    fn name(&self) -> &'static str {
        "unconfigured"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, CompletionError> {
        Err(CompletionError::NotConfigured)
    }

    async fn stream(&self, _messages: &[ChatMessage]) -> Result<FragmentStream, CompletionError> {
        Err(CompletionError::NotConfigured)
    }
}
