use crate::error::{Result, RotorError};
use sqlx::{Executor, PgPool};
use tracing::info;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    // Create migrations table if not exists
    create_migrations_table(pool).await?;

    // Run each migration in order
    let migrations = get_migrations();

    for (version, name, sql) in migrations {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            // Unprepared execution so a migration may hold several statements
            pool.execute(sql).await.map_err(RotorError::Database)?;

            // Record migration
            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| RotorError::Database(e))?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let result = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await
    .map_err(|e| RotorError::Database(e))?;

    Ok(result > 0)
}

/// Record a migration as applied
async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await
        .map_err(|e| RotorError::Database(e))?;

    Ok(())
}

/// Get all migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "ledger_table", MIGRATION_001_LEDGER),
        (2, "pool_table", MIGRATION_002_POOL),
    ]
}

// Migration 1: Ledger of every registered proxy
const MIGRATION_001_LEDGER: &str = r#"
CREATE TABLE IF NOT EXISTS ledger (
    address VARCHAR(21) PRIMARY KEY,
    latency DOUBLE PRECISION,
    last_used TIMESTAMPTZ,
    working BOOLEAN NOT NULL DEFAULT FALSE,
    retries INTEGER NOT NULL DEFAULT 0,
    successes BIGINT NOT NULL DEFAULT 0,
    fails BIGINT NOT NULL DEFAULT 0,
    reliability DOUBLE PRECISION NOT NULL DEFAULT 1.0,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Retry sweeps scan non-working proxies by tier
CREATE INDEX IF NOT EXISTS idx_ledger_retry ON ledger(working, retries, last_used);
"#;

// Migration 2: Hot pool, a rebuildable projection of working ledger rows
const MIGRATION_002_POOL: &str = r#"
CREATE TABLE IF NOT EXISTS pool (
    address VARCHAR(21) PRIMARY KEY REFERENCES ledger(address) ON DELETE CASCADE,
    latency DOUBLE PRECISION NOT NULL,
    last_used TIMESTAMPTZ,
    successes BIGINT NOT NULL,
    fails BIGINT NOT NULL,
    reliability DOUBLE PRECISION NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pool_last_used ON pool(last_used ASC NULLS FIRST);
"#;
