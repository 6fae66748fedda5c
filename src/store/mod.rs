//! Transactional storage for the proxy ledger and the hot pool
//!
//! Both logical tables live behind one store so that operations spanning them
//! (demotion, success accounting, claiming) are applied atomically.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{LedgerCounts, PoolEntry, ProxyAddress, ProxyRecord, Thresholds};
use crate::proxy::backoff::BackoffSchedule;
use crate::proxy::outcome::ProbeVerdict;

#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Insert a fresh ledger record. Fails with `DuplicateProxy` if the address exists.
    async fn insert(&self, address: &ProxyAddress, now: DateTime<Utc>) -> Result<ProxyRecord>;

    async fn get(&self, address: &str) -> Result<Option<ProxyRecord>>;

    /// All ledger records ordered by address
    async fn list(&self) -> Result<Vec<ProxyRecord>>;

    async fn counts(&self) -> Result<LedgerCounts>;

    /// Record a probe verdict. Counters and reliability change together; a faulty
    /// verdict also drops the proxy from the pool, a healthy one refreshes its pool row.
    async fn apply_probe(
        &self,
        address: &str,
        verdict: &ProbeVerdict,
        now: DateTime<Utc>,
    ) -> Result<ProxyRecord>;

    /// Non-working records whose backoff window has elapsed, lowest retry tier first
    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        schedule: &BackoffSchedule,
    ) -> Result<Vec<ProxyRecord>>;

    /// Mark not working and drop from the pool, leaving counters alone.
    /// Returns false if the address is unknown.
    async fn demote(&self, address: &str) -> Result<bool>;

    /// Count a successful dispatch in both the ledger and the pool
    async fn record_success(&self, address: &str) -> Result<()>;

    /// Replace the pool with the projection of every working ledger record
    async fn rebuild_pool(&self) -> Result<usize>;

    /// Atomically pick the least recently used admitted pool entry and stamp it with `now`
    async fn claim_least_recently_used(
        &self,
        thresholds: &Thresholds,
        now: DateTime<Utc>,
    ) -> Result<Option<PoolEntry>>;

    /// Least recently used admitted pool entry, without claiming it
    async fn peek_least_recently_used(&self, thresholds: &Thresholds)
        -> Result<Option<PoolEntry>>;

    async fn pool_len(&self) -> Result<usize>;

    /// Pool entries, least recently used first
    async fn pool_entries(&self) -> Result<Vec<PoolEntry>>;
}
