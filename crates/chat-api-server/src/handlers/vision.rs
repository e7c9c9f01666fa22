use axum::{
    extract::{Multipart, State},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::info;

use super::upload::read_form;
use crate::models::chat::{ChatMessage, ChatResponse};
use crate::state::AppState;
use crate::utils::error::ApiError;

/// Sends the image with a fixed prompt as a one-off request. Nothing is
/// recorded in any session.
pub async fn vision_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ChatResponse>, ApiError> {
    let form = read_form(multipart, &["image", "file"]).await?;
    if form.bytes.is_empty() {
        return Err(ApiError::BadRequest("Image is empty".to_string()));
    }

    let mime = image_mime(&form.bytes, &form.filename)
        .ok_or_else(|| ApiError::BadRequest(format!("{} is not a recognized image", form.filename)))?;
    let data_url = format!("data:{};base64,{}", mime, STANDARD.encode(&form.bytes));

    info!("Vision request: file={}, mime={}, bytes={}", form.filename, mime, form.bytes.len());

    let prompt = form.field("prompt").unwrap_or(state.settings.vision.prompt.as_str());
    let messages = vec![ChatMessage::user_with_image(prompt, data_url)];

    match state.conversation_manager.complete_once(messages).await {
        Ok(reply) => Ok(Json(ChatResponse::reply(reply))),
        Err(e) => Ok(Json(ChatResponse::failed(e.code(), e.to_string()))),
    }
}

/// Magic bytes first, then the file extension.
fn image_mime(bytes: &[u8], filename: &str) -> Option<String> {
    if let Some(kind) = infer::get(bytes) {
        return (kind.matcher_type() == infer::MatcherType::Image).then(|| kind.mime_type().to_string());
    }

    mime_guess::from_path(filename)
        .first()
        .filter(|m| m.type_() == mime_guess::mime::IMAGE)
        .map(|m| m.essence_str().to_string())
}
