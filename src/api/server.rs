//! Admin API server using Axum

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ApiServerConfig;
use crate::error::{Result, RotorError};
use crate::proxy::context::PoolContext;
use crate::proxy::health::HealthChecker;
use crate::services::ingest::ProxyImporter;

use super::middleware::cors_layer;
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub context: PoolContext,
    pub checker: Arc<HealthChecker>,
    pub importer: Arc<ProxyImporter>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(checker: Arc<HealthChecker>, import_batch_size: usize) -> Self {
        Self {
            context: checker.context().clone(),
            importer: Arc::new(ProxyImporter::new(checker.clone(), import_batch_size)),
            checker,
            started_at: Instant::now(),
        }
    }
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        let cors = cors_layer(&self.config.cors_origins);

        routes::create_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| {
                RotorError::InvalidConfig(format!(
                    "Invalid API server address: {}:{}",
                    self.config.host, self.config.port
                ))
            })?;

        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        info!("API server shut down");
        Ok(())
    }
}
