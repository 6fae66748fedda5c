//! Durable record of every proxy ever registered

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{Result, RotorError};
use crate::models::{LedgerCounts, ProxyAddress, ProxyRecord};
use crate::proxy::backoff::BackoffSchedule;
use crate::proxy::outcome::ProbeVerdict;
use crate::store::ProxyStore;

/// Ledger operations over the shared store
#[derive(Clone)]
pub struct ProxyLedger {
    store: Arc<dyn ProxyStore>,
    schedule: BackoffSchedule,
}

impl ProxyLedger {
    pub fn new(store: Arc<dyn ProxyStore>, schedule: BackoffSchedule) -> Self {
        Self { store, schedule }
    }

    /// Validate and insert a new proxy. It starts out not working and is due
    /// for a probe immediately.
    pub async fn register(&self, address: &str) -> Result<ProxyRecord> {
        let address = ProxyAddress::parse(address)?;
        let record = self.store.insert(&address, Utc::now()).await?;
        debug!(address = %record.address, "Proxy added to ledger");
        Ok(record)
    }

    pub async fn get(&self, address: &str) -> Result<ProxyRecord> {
        self.store
            .get(address)
            .await?
            .ok_or_else(|| RotorError::ProxyNotFound(address.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<ProxyRecord>> {
        self.store.list().await
    }

    pub async fn counts(&self) -> Result<LedgerCounts> {
        self.store.counts().await
    }

    pub fn schedule(&self) -> &BackoffSchedule {
        &self.schedule
    }

    /// Apply a probe verdict to the record's counters
    pub async fn record_probe_result(
        &self,
        address: &str,
        verdict: &ProbeVerdict,
        now: DateTime<Utc>,
    ) -> Result<ProxyRecord> {
        self.store.apply_probe(address, verdict, now).await
    }

    /// Non-working proxies whose backoff has elapsed, lowest retry tier first
    pub async fn list_eligible_for_retry(&self, now: DateTime<Utc>) -> Result<Vec<ProxyRecord>> {
        self.store.due_for_retry(now, &self.schedule).await
    }

    /// Take a proxy out of service after a failed dispatch. Counters are left untouched.
    pub async fn mark_demoted(&self, address: &str) -> Result<bool> {
        let demoted = self.store.demote(address).await?;
        if demoted {
            info!(address, "Proxy demoted");
        }
        Ok(demoted)
    }

    /// Count a successful dispatch
    pub async fn record_success(&self, address: &str) -> Result<()> {
        self.store.record_success(address).await
    }
}
