use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::TryStreamExt;
use tracing::{info, warn};

use crate::models::chat::{resolve_session_id, ChatRequest, ChatResponse};
use crate::state::AppState;

/// Model failures come back as a tagged `error` with HTTP 200; the reply
/// field is then null.
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResponse> {
    let session_id = resolve_session_id(
        request.session_id,
        &state.settings.conversation.default_session_id,
    );
    info!("Chat request: session={}, message_len={}", session_id, request.message.len());

    match state.conversation_manager.reply(&session_id, request.message).await {
        Ok(reply) => Json(ChatResponse::reply(reply)),
        Err(e) => Json(ChatResponse::failed(e.code(), e.to_string())),
    }
}

/// Plain-text chunked body, one chunk per fragment. If the stream cannot
/// start the caller gets 502 with the error JSON; a failure after the
/// first chunk aborts the body.
pub async fn chat_stream_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let session_id = resolve_session_id(
        request.session_id,
        &state.settings.conversation.default_session_id,
    );
    info!("Chat stream request: session={}, message_len={}", session_id, request.message.len());

    let fragments = match state
        .conversation_manager
        .stream_reply(&session_id, request.message)
        .await
    {
        Ok(fragments) => fragments,
        Err(e) => {
            return (
                StatusCode::BAD_GATEWAY,
                Json(ChatResponse::failed(e.code(), e.to_string())),
            )
                .into_response();
        }
    };

    let body = fragments.inspect_err(move |e| {
        warn!("Stream aborted for session {}: {}", session_id, e);
    });

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response()
}
