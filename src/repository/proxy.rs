use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::{Result, RotorError};
use crate::models::{LedgerCounts, PoolEntry, ProxyAddress, ProxyRecord, Thresholds};
use crate::proxy::backoff::BackoffSchedule;
use crate::proxy::outcome::ProbeVerdict;
use crate::store::ProxyStore;

/// Postgres-backed ledger and pool tables.
///
/// Counter updates recompute `reliability` inside the same `UPDATE`, and every
/// operation touching both tables runs in one transaction.
#[derive(Clone)]
pub struct ProxyRepository {
    db: PgPool,
}

impl ProxyRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProxyStore for ProxyRepository {
    async fn insert(&self, address: &ProxyAddress, now: DateTime<Utc>) -> Result<ProxyRecord> {
        let record = sqlx::query_as::<_, ProxyRecord>(
            r#"
            INSERT INTO ledger (address, reliability, created_at)
            VALUES ($1, 1.0, $2)
            ON CONFLICT (address) DO NOTHING
            RETURNING address, latency, last_used, working, retries,
                      successes, fails, reliability, last_error, created_at
            "#,
        )
        .bind(address.to_string())
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        match record {
            Some(record) => {
                info!(address = %record.address, "Registered proxy");
                Ok(record)
            }
            None => Err(RotorError::DuplicateProxy(address.to_string())),
        }
    }

    async fn get(&self, address: &str) -> Result<Option<ProxyRecord>> {
        let record = sqlx::query_as::<_, ProxyRecord>(
            r#"
            SELECT address, latency, last_used, working, retries,
                   successes, fails, reliability, last_error, created_at
            FROM ledger
            WHERE address = $1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    async fn list(&self) -> Result<Vec<ProxyRecord>> {
        let records = sqlx::query_as::<_, ProxyRecord>(
            r#"
            SELECT address, latency, last_used, working, retries,
                   successes, fails, reliability, last_error, created_at
            FROM ledger
            ORDER BY address
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(records)
    }

    async fn counts(&self) -> Result<LedgerCounts> {
        let (total, working) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE working) FROM ledger",
        )
        .fetch_one(&self.db)
        .await?;

        Ok(LedgerCounts { total, working })
    }

    async fn apply_probe(
        &self,
        address: &str,
        verdict: &ProbeVerdict,
        now: DateTime<Utc>,
    ) -> Result<ProxyRecord> {
        let mut tx = self.db.begin().await?;

        let record = match verdict {
            ProbeVerdict::Healthy { latency } => {
                let record = sqlx::query_as::<_, ProxyRecord>(
                    r#"
                    UPDATE ledger
                    SET latency = $2,
                        last_used = $3,
                        working = TRUE,
                        retries = 0,
                        last_error = NULL,
                        successes = successes + 1,
                        reliability = (successes + 1)::DOUBLE PRECISION / (successes + 1 + fails)
                    WHERE address = $1
                    RETURNING address, latency, last_used, working, retries,
                              successes, fails, reliability, last_error, created_at
                    "#,
                )
                .bind(address)
                .bind(latency.as_secs_f64())
                .bind(now)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| RotorError::ProxyNotFound(address.to_string()))?;

                sqlx::query(
                    r#"
                    UPDATE pool
                    SET latency = $2, last_used = $3, successes = $4, fails = $5, reliability = $6
                    WHERE address = $1
                    "#,
                )
                .bind(address)
                .bind(latency.as_secs_f64())
                .bind(now)
                .bind(record.successes)
                .bind(record.fails)
                .bind(record.reliability)
                .execute(&mut *tx)
                .await?;

                record
            }
            ProbeVerdict::Faulty(fault) => {
                let record = sqlx::query_as::<_, ProxyRecord>(
                    r#"
                    UPDATE ledger
                    SET last_used = $2,
                        working = FALSE,
                        retries = retries + 1,
                        last_error = $3,
                        fails = fails + 1,
                        reliability = successes::DOUBLE PRECISION / (successes + fails + 1)
                    WHERE address = $1
                    RETURNING address, latency, last_used, working, retries,
                              successes, fails, reliability, last_error, created_at
                    "#,
                )
                .bind(address)
                .bind(now)
                .bind(fault.to_string())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| RotorError::ProxyNotFound(address.to_string()))?;

                sqlx::query("DELETE FROM pool WHERE address = $1")
                    .bind(address)
                    .execute(&mut *tx)
                    .await?;

                record
            }
        };

        tx.commit().await?;
        Ok(record)
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        schedule: &BackoffSchedule,
    ) -> Result<Vec<ProxyRecord>> {
        let tiers: Vec<i64> = schedule
            .tiers()
            .iter()
            .map(|wait| wait.as_secs() as i64)
            .collect();

        let records = sqlx::query_as::<_, ProxyRecord>(
            r#"
            SELECT address, latency, last_used, working, retries,
                   successes, fails, reliability, last_error, created_at
            FROM ledger
            WHERE working = FALSE
              AND (
                last_used IS NULL
                OR $1 - last_used >= make_interval(secs => (
                    CASE
                        WHEN retries < cardinality($2::BIGINT[]) THEN ($2::BIGINT[])[retries + 1]
                        ELSE (retries - cardinality($2::BIGINT[]) + 1) * $3
                    END
                )::DOUBLE PRECISION)
              )
            ORDER BY retries ASC, last_used ASC NULLS FIRST
            "#,
        )
        .bind(now)
        .bind(tiers)
        .bind(schedule.overflow_step().as_secs() as i64)
        .fetch_all(&self.db)
        .await?;

        Ok(records)
    }

    async fn demote(&self, address: &str) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM pool WHERE address = $1")
            .bind(address)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("UPDATE ledger SET working = FALSE WHERE address = $1")
            .bind(address)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_success(&self, address: &str) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE ledger
            SET successes = successes + 1,
                reliability = (successes + 1)::DOUBLE PRECISION / (successes + 1 + fails)
            WHERE address = $1
            "#,
        )
        .bind(address)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RotorError::ProxyNotFound(address.to_string()));
        }

        sqlx::query(
            r#"
            UPDATE pool
            SET successes = successes + 1,
                reliability = (successes + 1)::DOUBLE PRECISION / (successes + 1 + fails)
            WHERE address = $1
            "#,
        )
        .bind(address)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn rebuild_pool(&self) -> Result<usize> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM pool").execute(&mut *tx).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO pool (address, latency, last_used, successes, fails, reliability)
            SELECT address, latency, last_used, successes, fails, reliability
            FROM ledger
            WHERE working = TRUE AND latency IS NOT NULL
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let size = result.rows_affected() as usize;
        debug!(size, "Rebuilt proxy pool");
        Ok(size)
    }

    async fn claim_least_recently_used(
        &self,
        thresholds: &Thresholds,
        now: DateTime<Utc>,
    ) -> Result<Option<PoolEntry>> {
        let mut tx = self.db.begin().await?;

        // SKIP LOCKED keeps concurrent claimers off the row being stamped
        let entry = sqlx::query_as::<_, PoolEntry>(
            r#"
            UPDATE pool
            SET last_used = $3
            WHERE address = (
                SELECT address
                FROM pool
                WHERE latency < $1 AND reliability > $2
                ORDER BY last_used ASC NULLS FIRST, address ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING address, latency, last_used, successes, fails, reliability
            "#,
        )
        .bind(thresholds.latency_ceiling)
        .bind(thresholds.reliability_floor)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(ref entry) = entry {
            sqlx::query("UPDATE ledger SET last_used = $2 WHERE address = $1")
                .bind(&entry.address)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(entry)
    }

    async fn peek_least_recently_used(
        &self,
        thresholds: &Thresholds,
    ) -> Result<Option<PoolEntry>> {
        let entry = sqlx::query_as::<_, PoolEntry>(
            r#"
            SELECT address, latency, last_used, successes, fails, reliability
            FROM pool
            WHERE latency < $1 AND reliability > $2
            ORDER BY last_used ASC NULLS FIRST, address ASC
            LIMIT 1
            "#,
        )
        .bind(thresholds.latency_ceiling)
        .bind(thresholds.reliability_floor)
        .fetch_optional(&self.db)
        .await?;

        Ok(entry)
    }

    async fn pool_len(&self) -> Result<usize> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pool")
            .fetch_one(&self.db)
            .await?;

        Ok(count as usize)
    }

    async fn pool_entries(&self) -> Result<Vec<PoolEntry>> {
        let entries = sqlx::query_as::<_, PoolEntry>(
            r#"
            SELECT address, latency, last_used, successes, fails, reliability
            FROM pool
            ORDER BY last_used ASC NULLS FIRST, address ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }
}
