use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::services::conversation::StoreStats;
use crate::state::AppState;

#[derive(Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    completion_provider: String,
    sessions: StoreStats,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Liveness probe
pub async fn root() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "Backend OK".to_string(),
    })
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let manager = &state.conversation_manager;
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            completion_provider: manager.completion().name().to_string(),
            sessions: manager.store().stats(),
            timestamp: chrono::Utc::now(),
        }),
    )
}
