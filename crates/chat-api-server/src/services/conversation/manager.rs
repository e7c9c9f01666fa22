use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::store::{ConversationStore, SessionLease};
use crate::config::Settings;
use crate::models::chat::ChatMessage;
use crate::services::completion::{CompletionClient, CompletionError};

/// Fragments relayed to the caller. The full reply is committed to the
/// store only after the last fragment; errors and early drops commit nothing.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Prepended to every request, never stored
    pub system_prompt: Option<String>,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl ManagerOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            system_prompt: settings
                .conversation
                .system_prompt
                .clone()
                .filter(|p| !p.trim().is_empty()),
            request_timeout: settings.llm.request_timeout(),
            stream_idle_timeout: settings.llm.stream_idle_timeout(),
        }
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            request_timeout: Duration::from_secs(60),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs chat exchanges: store the user turn, ask the model with the full
/// history, store the reply.
///
/// On any completion failure the user turn stays and no assistant turn is
/// appended, so the history never holds error text posing as a reply.
pub struct ConversationManager {
    store: Arc<dyn ConversationStore>,
    completion: Arc<dyn CompletionClient>,
    options: ManagerOptions,
}

impl ConversationManager {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        completion: Arc<dyn CompletionClient>,
        options: ManagerOptions,
    ) -> Self {
        info!(
            "Conversation manager ready: provider={}, system_prompt={}",
            completion.name(),
            options.system_prompt.is_some()
        );
        Self { store, completion, options }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn completion(&self) -> &Arc<dyn CompletionClient> {
        &self.completion
    }

    /// Non-streaming exchange.
    pub async fn reply(&self, session_id: &str, message: String) -> Result<String, CompletionError> {
        let start_time = Instant::now();
        let (_lease, messages) = self.open_exchange(session_id, message).await;

        let result = match timeout(self.options.request_timeout, self.completion.complete(&messages)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.options.request_timeout)),
        };

        match result {
            Ok(reply) => {
                self.store.append_assistant_turn(session_id, reply.clone()).await;
                info!(
                    "Chat completed: session={}, reply_len={}, elapsed_ms={}",
                    session_id,
                    reply.len(),
                    start_time.elapsed().as_millis()
                );
                Ok(reply)
            }
            Err(e) => {
                warn!("Completion failed for session {}, keeping user turn only: {}", session_id, e);
                Err(e)
            }
        }
    }

    /// Streaming exchange. Fails before the first fragment if the provider
    /// cannot start a stream; the lease is held until the stream ends or is dropped.
    pub async fn stream_reply(
        &self,
        session_id: &str,
        message: String,
    ) -> Result<ReplyStream, CompletionError> {
        let (lease, messages) = self.open_exchange(session_id, message).await;

        let started = match timeout(self.options.request_timeout, self.completion.stream(&messages)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.options.request_timeout)),
        };

        let fragments = match started {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!("Failed to start stream for session {}: {}", session_id, e);
                return Err(e);
            }
        };

        Ok(relay(
            self.store.clone(),
            session_id.to_string(),
            lease,
            fragments,
            self.options.stream_idle_timeout,
        ))
    }

    /// One-off request outside any session (vision, previews).
    pub async fn complete_once(&self, messages: Vec<ChatMessage>) -> Result<String, CompletionError> {
        let messages = self.with_system_prompt(messages);
        match timeout(self.options.request_timeout, self.completion.complete(&messages)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.options.request_timeout)),
        }
    }

    async fn open_exchange(&self, session_id: &str, message: String) -> (SessionLease, Vec<ChatMessage>) {
        let lease = self.store.lease(session_id).await;
        debug!("Session {} leased, message_len={}", session_id, message.len());

        self.store.append_user_turn(session_id, message).await;
        let history = self.store.snapshot(session_id).await;
        let messages = self.with_system_prompt(history.into_iter().map(ChatMessage::from).collect());

        (lease, messages)
    }

    fn with_system_prompt(&self, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        match &self.options.system_prompt {
            Some(prompt) => {
                let mut out = Vec::with_capacity(messages.len() + 1);
                out.push(ChatMessage::system(prompt.clone()));
                out.extend(messages);
                out
            }
            None => messages,
        }
    }
}

fn relay(
    store: Arc<dyn ConversationStore>,
    session_id: String,
    lease: SessionLease,
    mut fragments: crate::services::completion::FragmentStream,
    idle_timeout: Duration,
) -> ReplyStream {
    let stream = async_stream::stream! {
        let _lease = lease;
        let mut reply = String::new();
        let mut count = 0usize;

        loop {
            let next = match timeout(idle_timeout, fragments.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!("Stream for session {} stalled, discarding partial reply", session_id);
                    yield Err(CompletionError::Timeout(idle_timeout));
                    return;
                }
            };

            match next {
                Some(Ok(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    reply.push_str(&fragment);
                    count += 1;
                    yield Ok(fragment);
                }
                Some(Err(e)) => {
                    warn!("Stream for session {} failed after {} fragment(s), discarding partial reply: {}", session_id, count, e);
                    yield Err(e);
                    return;
                }
                None => break,
            }
        }

        debug!("Stream for session {} finished: {} fragment(s), {} bytes", session_id, count, reply.len());
        store.append_assistant_turn(&session_id, reply).await;
    };

    Box::pin(stream)
}
