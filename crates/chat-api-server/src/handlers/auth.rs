use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::middleware::bearer_token;
use crate::auth::AuthError;
use crate::state::AppState;
use crate::utils::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub uid: String,
}

/// Verifies an ID token passed as `?token=` or as a bearer header.
pub async fn verify_token_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<AuthResponse>, ApiError> {
    let verifier = state
        .identity
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable("Identity verification is not configured".to_string()))?;

    let token = query
        .token
        .filter(|t| !t.trim().is_empty())
        .or_else(|| bearer_token(&headers))
        .ok_or(AuthError::MissingToken)?;

    let identity = verifier.verify(&token).await?;
    info!("Token verified for uid={}", identity.uid);

    Ok(Json(AuthResponse { uid: identity.uid }))
}
