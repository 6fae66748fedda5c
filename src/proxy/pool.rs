//! Hot pool of working proxies that selection reads from

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::Result;
use crate::models::{PoolEntry, Thresholds};
use crate::store::ProxyStore;

#[derive(Clone)]
pub struct ProxyPool {
    store: Arc<dyn ProxyStore>,
}

impl ProxyPool {
    pub fn new(store: Arc<dyn ProxyStore>) -> Self {
        Self { store }
    }

    /// Replace the pool with every working ledger record. Returns the new size.
    pub async fn rebuild(&self) -> Result<usize> {
        let size = self.store.rebuild_pool().await?;
        info!(size, "Proxy pool rebuilt");
        Ok(size)
    }

    /// Claim the least recently used proxy admitted by `thresholds`, stamping
    /// its `last_used` so concurrent claimers move on to the next one.
    pub async fn claim(
        &self,
        thresholds: &Thresholds,
        now: DateTime<Utc>,
    ) -> Result<Option<PoolEntry>> {
        self.store.claim_least_recently_used(thresholds, now).await
    }

    /// Least recently used admitted proxy, without claiming it
    pub async fn least_recently_used(&self, thresholds: &Thresholds) -> Result<Option<PoolEntry>> {
        self.store.peek_least_recently_used(thresholds).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.pool_len().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn entries(&self) -> Result<Vec<PoolEntry>> {
        self.store.pool_entries().await
    }
}
