use futures::stream;

use crate::models::chat::{ChatMessage, Role};
use crate::services::completion::{CompletionClient, CompletionError, FragmentStream};

/// Canned replies for running without a model provider.
///
/// Matches keywords in the latest user turn, case-insensitively.
#[derive(Debug, Default, Clone)]
pub struct OfflineResponder;

impl OfflineResponder {
    pub fn new() -> Self {
        Self
    }

    pub fn respond(message: &str) -> String {
        let lowered = message.to_lowercase();
        if lowered.contains("bonjour") {
            "Bonjour, comment puis-je t’aider ?".to_string()
        } else if lowered.contains("temps") {
            "Je suis une IA hors ligne intelligente.".to_string()
        } else {
            format!("Réponse IA : {}", message)
        }
    }

    fn last_user_text(messages: &[ChatMessage]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(ChatMessage::text)
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl CompletionClient for OfflineResponder {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        Ok(Self::respond(&Self::last_user_text(messages)))
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream, CompletionError> {
        let reply = Self::respond(&Self::last_user_text(messages));

        // Word-sized fragments; whitespace stays attached so the concatenation is exact
        let mut fragments: Vec<Result<String, CompletionError>> = Vec::new();
        let mut current = String::new();
        for ch in reply.chars() {
            current.push(ch);
            if ch == ' ' {
                fragments.push(Ok(std::mem::take(&mut current)));
            }
        }
        if !current.is_empty() {
            fragments.push(Ok(current));
        }

        Ok(Box::pin(stream::iter(fragments)))
    }
}
