use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::state::AppState;
use crate::utils::error::ApiError;

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Rejects requests without a verified bearer token and attaches the
/// [`VerifiedIdentity`](crate::auth::VerifiedIdentity) to request extensions.
pub async fn require_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let verifier = state
        .identity
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable("Identity verification is not configured".to_string()))?;

    let token = bearer_token(request.headers())
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    let identity = verifier.verify(&token).await?;
    debug!("Request authenticated for uid={}", identity.uid);

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
