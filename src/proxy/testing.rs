//! Test doubles shared by the health checker, controller and dispatcher tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;

use crate::error::{Result, RotorError};
use crate::models::{LedgerCounts, PoolEntry, ProxyAddress, ProxyRecord, Thresholds};
use crate::proxy::backoff::BackoffSchedule;
use crate::proxy::client::{ForwardRequest, Forwarded, ProbeClient};
use crate::proxy::context::PoolContext;
use crate::proxy::outcome::{Outcome, ProbeVerdict, ProxyFault};
use crate::store::{MemoryStore, ProxyStore};

/// How a scripted proxy behaves
#[derive(Debug, Clone)]
pub enum Script {
    Healthy(Duration),
    Fault(ProxyFault),
    Caller(String),
}

/// `ProbeClient` whose answers are fixed per proxy address. Unscripted
/// addresses refuse the connection.
#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, address: &str, script: Script) {
        self.scripts.lock().insert(address.to_string(), script);
    }

    pub fn healthy(&self, address: &str, latency_ms: u64) {
        self.script(address, Script::Healthy(Duration::from_millis(latency_ms)));
    }

    pub fn refuse(&self, address: &str) {
        self.script(
            address,
            Script::Fault(ProxyFault::Unreachable("connection refused".into())),
        );
    }

    /// Addresses contacted, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn lookup(&self, address: &str) -> Script {
        self.calls.lock().push(address.to_string());
        self.scripts
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_else(|| Script::Fault(ProxyFault::Unreachable("connection refused".into())))
    }
}

#[async_trait]
impl ProbeClient for ScriptedClient {
    async fn probe(&self, address: &str, _endpoint: &str) -> Outcome<Duration> {
        match self.lookup(address) {
            Script::Healthy(latency) => Outcome::Success(latency),
            Script::Fault(fault) => Outcome::ProxyFault(fault),
            Script::Caller(message) => Outcome::CallerFault(message),
        }
    }

    async fn forward(&self, address: &str, _request: &ForwardRequest) -> Outcome<Forwarded> {
        match self.lookup(address) {
            Script::Healthy(_) => Outcome::Success(Forwarded {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::from(format!("ok from {address}")),
            }),
            Script::Fault(fault) => Outcome::ProxyFault(fault),
            Script::Caller(message) => Outcome::CallerFault(message),
        }
    }
}

/// Register `address`, record a successful probe at `at` and rebuild the pool
pub async fn seed_working(
    context: &PoolContext,
    address: &str,
    latency_secs: f64,
    at: DateTime<Utc>,
) -> ProxyRecord {
    context.ledger().register(address).await.unwrap();
    let verdict = ProbeVerdict::Healthy {
        latency: Duration::from_secs_f64(latency_secs),
    };
    let record = context
        .ledger()
        .record_probe_result(address, &verdict, at)
        .await
        .unwrap();
    context.pool().rebuild().await.unwrap();
    record
}

/// `MemoryStore` whose demote and claim operations can be switched to fail
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_demote: AtomicBool,
    fail_claim: AtomicBool,
}

impl FlakyStore {
    pub fn fail_demote(&self) {
        self.fail_demote.store(true, Ordering::SeqCst);
    }

    pub fn fail_claim(&self) {
        self.fail_claim.store(true, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(RotorError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl ProxyStore for FlakyStore {
    async fn insert(&self, address: &ProxyAddress, now: DateTime<Utc>) -> Result<ProxyRecord> {
        self.inner.insert(address, now).await
    }

    async fn get(&self, address: &str) -> Result<Option<ProxyRecord>> {
        self.inner.get(address).await
    }

    async fn list(&self) -> Result<Vec<ProxyRecord>> {
        self.inner.list().await
    }

    async fn counts(&self) -> Result<LedgerCounts> {
        self.inner.counts().await
    }

    async fn apply_probe(
        &self,
        address: &str,
        verdict: &ProbeVerdict,
        now: DateTime<Utc>,
    ) -> Result<ProxyRecord> {
        self.inner.apply_probe(address, verdict, now).await
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        schedule: &BackoffSchedule,
    ) -> Result<Vec<ProxyRecord>> {
        self.inner.due_for_retry(now, schedule).await
    }

    async fn demote(&self, address: &str) -> Result<bool> {
        Self::check(&self.fail_demote)?;
        self.inner.demote(address).await
    }

    async fn record_success(&self, address: &str) -> Result<()> {
        self.inner.record_success(address).await
    }

    async fn rebuild_pool(&self) -> Result<usize> {
        self.inner.rebuild_pool().await
    }

    async fn claim_least_recently_used(
        &self,
        thresholds: &Thresholds,
        now: DateTime<Utc>,
    ) -> Result<Option<PoolEntry>> {
        Self::check(&self.fail_claim)?;
        self.inner.claim_least_recently_used(thresholds, now).await
    }

    async fn peek_least_recently_used(
        &self,
        thresholds: &Thresholds,
    ) -> Result<Option<PoolEntry>> {
        self.inner.peek_least_recently_used(thresholds).await
    }

    async fn pool_len(&self) -> Result<usize> {
        self.inner.pool_len().await
    }

    async fn pool_entries(&self) -> Result<Vec<PoolEntry>> {
        self.inner.pool_entries().await
    }
}
