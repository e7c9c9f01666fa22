use serde::{Deserialize, Serialize};

/// Opaque, caller-supplied conversation key
pub type SessionId = String;

// ===== CONVERSATION MODELS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message in a session history. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

// ===== PROVIDER MESSAGE MODELS =====

/// Message as sent to the completion provider (OpenAI wire shape)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: MessageContent::Text(content.into()) }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(content.into()) }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(content.into()) }
    }

    /// User message carrying a prompt and an inline image (data URL)
    pub fn user_with_image(prompt: impl Into<String>, data_url: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: prompt.into() },
                ContentPart::ImageUrl { image_url: ImageUrl { url: data_url.into() } },
            ]),
        }
    }

    /// Plain text of the message; image parts are skipped.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<Turn> for ChatMessage {
    fn from(turn: Turn) -> Self {
        Self { role: turn.role, content: MessageContent::Text(turn.content) }
    }
}

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

/// Missing or blank ids fall back to the configured default session.
pub fn resolve_session_id(requested: Option<String>, default_id: &str) -> SessionId {
    requested
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| default_id.to_string())
}

// ===== RESPONSE MODELS =====

/// Either the model's reply or a tagged failure, never both.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ChatResponse {
    pub fn reply(text: String) -> Self {
        Self { response: Some(text), error: None }
    }

    pub fn failed(code: &str, message: impl Into<String>) -> Self {
        Self {
            response: None,
            error: Some(ErrorInfo { code: code.to_string(), message: message.into() }),
        }
    }
}
