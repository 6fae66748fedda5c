//! Hot pool handlers

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::info;

use crate::api::server::AppState;
use crate::error::RotorError;

/// Pool entries in selection order
pub async fn list_pool(State(state): State<AppState>) -> Result<impl IntoResponse, RotorError> {
    let entries = state.context.pool().entries().await?;
    Ok(Json(entries))
}

/// Repopulate the pool from the ledger's working proxies
pub async fn rebuild_pool(State(state): State<AppState>) -> Result<impl IntoResponse, RotorError> {
    let pool_size = state.context.pool().rebuild().await?;
    info!(pool_size, "Pool rebuilt on request");

    Ok(Json(json!({ "pool_size": pool_size })))
}

pub async fn get_thresholds(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.context.thresholds().current())
}
