//! Liveness and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::RotorError;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "proxy-rotor"
        })),
    )
}

/// Ledger totals, pool size and the current thresholds
pub async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, RotorError> {
    let ledger = state.context.ledger().counts().await?;
    let pool_size = state.context.pool().len().await?;

    Ok(Json(json!({
        "ledger": ledger,
        "pool_size": pool_size,
        "thresholds": state.context.thresholds().current(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    })))
}
