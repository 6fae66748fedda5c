//! In-process store
//!
//! Both tables sit behind a single mutex; every trait method is one critical section.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::ProxyStore;
use crate::error::{Result, RotorError};
use crate::models::{LedgerCounts, PoolEntry, ProxyAddress, ProxyRecord, Thresholds};
use crate::proxy::backoff::BackoffSchedule;
use crate::proxy::outcome::ProbeVerdict;

#[derive(Debug, Default)]
struct Tables {
    ledger: BTreeMap<String, ProxyRecord>,
    pool: HashMap<String, PoolEntry>,
}

impl Tables {
    fn least_recently_used(&self, thresholds: &Thresholds) -> Option<&PoolEntry> {
        self.pool
            .values()
            .filter(|entry| thresholds.admits(entry.latency, entry.reliability))
            .min_by(|a, b| (a.last_used, &a.address).cmp(&(b.last_used, &b.address)))
    }
}

/// Store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProxyStore for MemoryStore {
    async fn insert(&self, address: &ProxyAddress, now: DateTime<Utc>) -> Result<ProxyRecord> {
        let mut tables = self.tables.lock();
        let key = address.to_string();

        if tables.ledger.contains_key(&key) {
            return Err(RotorError::DuplicateProxy(key));
        }

        let record = ProxyRecord::new(address, now);
        tables.ledger.insert(key, record.clone());
        Ok(record)
    }

    async fn get(&self, address: &str) -> Result<Option<ProxyRecord>> {
        Ok(self.tables.lock().ledger.get(address).cloned())
    }

    async fn list(&self) -> Result<Vec<ProxyRecord>> {
        Ok(self.tables.lock().ledger.values().cloned().collect())
    }

    async fn counts(&self) -> Result<LedgerCounts> {
        let tables = self.tables.lock();
        Ok(LedgerCounts {
            total: tables.ledger.len() as i64,
            working: tables.ledger.values().filter(|r| r.working).count() as i64,
        })
    }

    async fn apply_probe(
        &self,
        address: &str,
        verdict: &ProbeVerdict,
        now: DateTime<Utc>,
    ) -> Result<ProxyRecord> {
        let mut tables = self.tables.lock();

        let record = tables
            .ledger
            .get_mut(address)
            .ok_or_else(|| RotorError::ProxyNotFound(address.to_string()))?;

        match verdict {
            ProbeVerdict::Healthy { latency } => {
                record.mark_probe_success(latency.as_secs_f64(), now);
            }
            ProbeVerdict::Faulty(fault) => {
                record.mark_probe_failure(fault.to_string(), now);
            }
        }
        let record = record.clone();

        match record.pool_entry() {
            Some(entry) => {
                if let Some(existing) = tables.pool.get_mut(address) {
                    *existing = entry;
                }
            }
            None => {
                tables.pool.remove(address);
            }
        }

        Ok(record)
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        schedule: &BackoffSchedule,
    ) -> Result<Vec<ProxyRecord>> {
        let tables = self.tables.lock();

        let mut due: Vec<ProxyRecord> = tables
            .ledger
            .values()
            .filter(|record| schedule.is_due(record, now))
            .cloned()
            .collect();
        due.sort_by(|a, b| (a.retries, a.last_used).cmp(&(b.retries, b.last_used)));

        Ok(due)
    }

    async fn demote(&self, address: &str) -> Result<bool> {
        let mut tables = self.tables.lock();

        tables.pool.remove(address);
        match tables.ledger.get_mut(address) {
            Some(record) => {
                record.working = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_success(&self, address: &str) -> Result<()> {
        let mut tables = self.tables.lock();

        let record = tables
            .ledger
            .get_mut(address)
            .ok_or_else(|| RotorError::ProxyNotFound(address.to_string()))?;
        record.mark_dispatch_success();

        if let Some(entry) = tables.pool.get_mut(address) {
            entry.mark_dispatch_success();
        }

        Ok(())
    }

    async fn rebuild_pool(&self) -> Result<usize> {
        let mut tables = self.tables.lock();

        let pool: HashMap<String, PoolEntry> = tables
            .ledger
            .values()
            .filter_map(ProxyRecord::pool_entry)
            .map(|entry| (entry.address.clone(), entry))
            .collect();

        let size = pool.len();
        tables.pool = pool;
        Ok(size)
    }

    async fn claim_least_recently_used(
        &self,
        thresholds: &Thresholds,
        now: DateTime<Utc>,
    ) -> Result<Option<PoolEntry>> {
        let mut tables = self.tables.lock();

        let Some(address) = tables
            .least_recently_used(thresholds)
            .map(|entry| entry.address.clone())
        else {
            return Ok(None);
        };

        if let Some(record) = tables.ledger.get_mut(&address) {
            record.last_used = Some(now);
        }

        Ok(tables.pool.get_mut(&address).map(|entry| {
            entry.last_used = Some(now);
            entry.clone()
        }))
    }

    async fn peek_least_recently_used(
        &self,
        thresholds: &Thresholds,
    ) -> Result<Option<PoolEntry>> {
        Ok(self
            .tables
            .lock()
            .least_recently_used(thresholds)
            .cloned())
    }

    async fn pool_len(&self) -> Result<usize> {
        Ok(self.tables.lock().pool.len())
    }

    async fn pool_entries(&self) -> Result<Vec<PoolEntry>> {
        let tables = self.tables.lock();

        let mut entries: Vec<PoolEntry> = tables.pool.values().cloned().collect();
        entries.sort_by(|a, b| (a.last_used, &a.address).cmp(&(b.last_used, &b.address)));
        Ok(entries)
    }
}
