//! Proxy Rotor - Entry Point
//!
//! Starts the background loops, the proxy listener and the admin API with
//! graceful shutdown support.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proxy_rotor::api::{ApiServer, AppState};
use proxy_rotor::config::{Config, LogConfig, StoreBackend};
use proxy_rotor::database::Database;
use proxy_rotor::proxy::{
    BackoffSchedule, Dispatcher, HealthChecker, HealthCheckerHandle, HttpProbeClient,
    PoolContext, ProxyServer, ThresholdController,
};
use proxy_rotor::repository::ProxyRepository;
use proxy_rotor::services::ProxyImporter;
use proxy_rotor::store::{MemoryStore, ProxyStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config.log);

    info!("Starting Proxy Rotor");

    // Pick the store backing the ledger and the pool
    let mut database = None;
    let store: Arc<dyn ProxyStore> = match config.store {
        StoreBackend::Postgres => {
            let db = Database::new(&config)
                .await
                .context("Failed to connect to database")?;
            db.run_migrations()
                .await
                .context("Failed to run database migrations")?;

            let repository = ProxyRepository::new(db.pool().clone());
            database = Some(db);
            Arc::new(repository)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; proxies are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let context = PoolContext::new(
        store,
        BackoffSchedule::default(),
        config.initial_thresholds(),
    );
    let pool_size = context
        .pool()
        .rebuild()
        .await
        .context("Failed to build the proxy pool")?;
    info!("Loaded {} working proxies into the pool", pool_size);

    let client = Arc::new(HttpProbeClient::new(
        Duration::from_secs(config.proxy.connect_timeout),
        Duration::from_secs(config.proxy.request_timeout),
    ));

    let health_checker = Arc::new(HealthChecker::new(
        context.clone(),
        client.clone(),
        config.health_checker_config(),
    ));

    if let Some(path) = &config.import.file {
        let importer = ProxyImporter::new(health_checker.clone(), config.import.batch_size);
        match importer.import_file(path).await {
            Ok(summary) => info!(
                file = %path,
                found = summary.found,
                added = summary.added,
                working = summary.working,
                "Startup import complete"
            ),
            Err(e) => error!("Failed to import {}: {}", path, e),
        }
    }

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start health checker
    let (health_handle, health_shutdown) = HealthCheckerHandle::new();
    let checker = health_checker.clone();
    let health_task = tokio::spawn(async move {
        checker.run(health_shutdown).await;
    });

    // Start threshold controller
    let controller = ThresholdController::new(context.clone(), config.threshold_config());
    let controller_shutdown = shutdown_tx.subscribe();
    let controller_task = tokio::spawn(async move {
        controller.run(controller_shutdown).await;
    });

    // Create proxy server
    let dispatcher = Arc::new(Dispatcher::new(
        context.clone(),
        client,
        config.dispatcher_config(),
    ));
    let proxy_server = ProxyServer::new(config.proxy_addr(), dispatcher);

    // Create API server
    let api_server = ApiServer::new(
        config.api.clone(),
        AppState::new(health_checker, config.import.batch_size),
    );

    // Start servers
    let proxy_shutdown = shutdown_tx.subscribe();
    let api_shutdown = shutdown_tx.subscribe();

    let proxy_task = tokio::spawn(async move {
        if let Err(e) = proxy_server.run(proxy_shutdown).await {
            error!("Proxy server error: {}", e);
        }
    });

    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!(
        "Servers started - Proxy: {}, API: {}",
        config.proxy_addr(),
        config.api_addr()
    );

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    health_handle.shutdown();

    let _ = tokio::join!(proxy_task, api_task, health_task, controller_task);

    if let Some(db) = database {
        db.close().await;
    }

    info!("Proxy Rotor stopped");
    Ok(())
}

/// `RUST_LOG` wins over `LOG_LEVEL`; `LOG_FORMAT=json` switches to JSON lines
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("proxy_rotor={},tower_http={}", log.level, log.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
