//! `/ping/:token`: heartbeat endpoint for dead-man's-switch monitors.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::server::app::AppState;

pub async fn ping_handler(State(state): State<AppState>, Path(token): Path<String>) -> (StatusCode, Json<serde_json::Value>) {
    match state.monitor_checker.handle_ping(&token).await {
        Ok(_) => (StatusCode::NO_CONTENT, Json(serde_json::json!({}))),
        Err(crate::CoreError::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown monitor token" })),
        ),
        Err(crate::CoreError::MonitorDisabled) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "monitor is disabled" })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}
