use axum::{
    extract::{Multipart, State},
    Json,
};
use tracing::{debug, info};

use super::upload::read_form;
use crate::document::{truncate_chars, Extraction};
use crate::models::chat::{resolve_session_id, ChatResponse};
use crate::state::AppState;
use crate::utils::error::ApiError;

/// Extracts the document, cuts it to the character budget and sends it
/// through the session's chat pipeline.
pub async fn analyze_document_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ChatResponse>, ApiError> {
    let form = read_form(multipart, &["file"]).await?;
    let session_id = resolve_session_id(
        form.field("session_id").map(str::to_string),
        &state.settings.conversation.default_session_id,
    );

    let text = match state.document_service.read_text(&form.filename, &form.bytes)? {
        Extraction::Text(text) => text,
        Extraction::Unsupported => {
            return Ok(Json(ChatResponse::failed(
                "UNSUPPORTED_FORMAT",
                format!("Cannot extract text from {}", form.filename),
            )));
        }
    };

    if text.trim().is_empty() {
        return Ok(Json(ChatResponse::failed(
            "EMPTY_DOCUMENT",
            "No text content found in document",
        )));
    }

    let (excerpt, truncated) = truncate_chars(&text, state.settings.documents.char_budget);
    if truncated {
        debug!("Document {} truncated to {} characters", form.filename, state.settings.documents.char_budget);
    }

    let instruction = form
        .field("question")
        .unwrap_or(state.settings.documents.analyze_prompt.as_str());
    let message = format!("{}\n\n{}", instruction, excerpt);

    info!(
        "Document analysis: session={}, file={}, message_len={}",
        session_id,
        form.filename,
        message.len()
    );

    match state.conversation_manager.reply(&session_id, message).await {
        Ok(reply) => Ok(Json(ChatResponse::reply(reply))),
        Err(e) => Ok(Json(ChatResponse::failed(e.code(), e.to_string()))),
    }
}
