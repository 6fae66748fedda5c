//! Proxy ledger handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::api::server::AppState;
use crate::error::RotorError;
use crate::models::ProxyRecord;

/// Body of `POST /api/proxies`
#[derive(Debug, Deserialize)]
pub struct CreateProxyRequest {
    pub address: String,
    /// Probe immediately instead of waiting for the next sweep
    #[serde(default)]
    pub probe: bool,
}

/// List every proxy in the ledger
pub async fn list_proxies(State(state): State<AppState>) -> Result<impl IntoResponse, RotorError> {
    let proxies = state.context.ledger().list().await?;
    Ok(Json(proxies))
}

/// Get a single proxy
pub async fn get_proxy(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, RotorError> {
    let proxy = state.context.ledger().get(&address).await?;
    Ok(Json(proxy))
}

/// Register a proxy, optionally probing it straight away
pub async fn create_proxy(
    State(state): State<AppState>,
    Json(req): Json<CreateProxyRequest>,
) -> Result<impl IntoResponse, RotorError> {
    if req.address.trim().is_empty() {
        return Err(RotorError::InvalidRequest("Address is required".to_string()));
    }

    let proxy = if req.probe {
        let proxy = state.checker.admit(req.address.trim()).await?;
        refresh_pool(&state, &proxy).await?;
        proxy
    } else {
        state.context.ledger().register(req.address.trim()).await?
    };

    info!(address = %proxy.address, working = proxy.working, "Created proxy");

    Ok((StatusCode::CREATED, Json(proxy)))
}

/// Probe a registered proxy now
pub async fn check_proxy(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, RotorError> {
    let proxy = state.checker.check(&address).await?;
    refresh_pool(&state, &proxy).await?;

    Ok(Json(proxy))
}

/// Bulk import from a free-text body
pub async fn import_proxies(
    State(state): State<AppState>,
    body: String,
) -> Result<impl IntoResponse, RotorError> {
    let summary = state.importer.import(&body).await?;
    Ok(Json(summary))
}

/// A proxy that just passed a probe becomes selectable immediately
async fn refresh_pool(state: &AppState, proxy: &ProxyRecord) -> Result<(), RotorError> {
    if proxy.working {
        state.context.pool().rebuild().await?;
    }
    Ok(())
}
