use crate::config::Config;
use crate::error::{Result, RotorError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, warn};

/// Connection attempts before startup gives up
const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Postgres connection pool backing the proxy repository
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect, retrying briefly while the server comes up
    pub async fn new(config: &Config) -> Result<Self> {
        let url = config.database_url();
        let options = PgPoolOptions::new()
            .min_connections(config.database.min_connections)
            .max_connections(config.database.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(30 * 60));

        info!(
            host = %config.database.host,
            port = config.database.port,
            database = %config.database.name,
            "Connecting to database"
        );

        let mut attempt = 1;
        let pool = loop {
            match options.clone().connect(&url).await {
                Ok(pool) => break pool,
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    warn!(attempt, "Database not reachable yet: {}", e);
                    tokio::time::sleep(CONNECT_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(RotorError::DatabaseConnection(e.to_string())),
            }
        };

        info!("Database connection pool established");
        Ok(Database { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Bring the ledger and pool tables up to date
    pub async fn run_migrations(&self) -> Result<()> {
        super::migrations::run_migrations(&self.pool).await
    }

    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}
