//! Health checking for upstream proxies
//!
//! Non-working proxies are re-probed once their backoff window elapses; a
//! successful probe recommissions them and the pool is rebuilt.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Result, RotorError};
use crate::models::ProxyRecord;
use crate::proxy::client::ProbeClient;
use crate::proxy::context::PoolContext;
use crate::proxy::outcome::{Outcome, ProbeVerdict, ProxyFault};

/// Health checker configuration
#[derive(Debug, Clone)]
pub struct HealthCheckerConfig {
    /// Pause between sweeps
    pub sweep_interval: Duration,
    /// Known-good endpoint fetched through each proxy
    pub check_url: String,
    /// Concurrent probes within one backoff tier
    pub workers: usize,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(500),
            check_url: "http://catfact.ninja/fact".to_string(),
            workers: 20,
        }
    }
}

/// Tally of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub probed: usize,
    pub recommissioned: usize,
    pub failed: usize,
}

/// Health checker for upstream proxies
pub struct HealthChecker {
    context: PoolContext,
    client: Arc<dyn ProbeClient>,
    config: HealthCheckerConfig,
}

impl HealthChecker {
    pub fn new(
        context: PoolContext,
        client: Arc<dyn ProbeClient>,
        config: HealthCheckerConfig,
    ) -> Self {
        Self {
            context,
            client,
            config,
        }
    }

    pub fn context(&self) -> &PoolContext {
        &self.context
    }

    async fn verdict(&self, address: &str) -> ProbeVerdict {
        match self.client.probe(address, &self.config.check_url).await {
            Outcome::Success(latency) => ProbeVerdict::Healthy { latency },
            Outcome::ProxyFault(fault) => ProbeVerdict::Faulty(fault),
            // A probe request that cannot be sent counts against the proxy
            Outcome::CallerFault(message) => ProbeVerdict::Faulty(ProxyFault::Unreachable(message)),
        }
    }

    /// Probe a proxy without recording anything. Returns the measured latency.
    pub async fn probe(&self, address: &str) -> Result<Duration> {
        match self.verdict(address).await {
            ProbeVerdict::Healthy { latency } => Ok(latency),
            ProbeVerdict::Faulty(fault) => Err(RotorError::from(fault)),
        }
    }

    /// Probe a registered proxy now and record the verdict
    #[instrument(skip(self))]
    pub async fn check(&self, address: &str) -> Result<ProxyRecord> {
        // Unknown addresses are rejected before any traffic is sent
        self.context.ledger().get(address).await?;

        let verdict = self.verdict(address).await;
        let record = self
            .context
            .ledger()
            .record_probe_result(address, &verdict, Utc::now())
            .await?;

        match verdict {
            ProbeVerdict::Healthy { latency } => {
                debug!(latency_ms = latency.as_millis() as u64, "Proxy is healthy");
            }
            ProbeVerdict::Faulty(fault) => {
                debug!(retries = record.retries, error = %fault, "Proxy is unhealthy");
            }
        }

        Ok(record)
    }

    /// Register a proxy and probe it straight away
    pub async fn admit(&self, address: &str) -> Result<ProxyRecord> {
        let record = self.context.ledger().register(address).await?;
        self.check(&record.address).await
    }

    /// Probe every proxy whose backoff has elapsed, lowest tier first. The pool
    /// is rebuilt when at least one proxy came back.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let due = self.context.ledger().list_eligible_for_retry(now).await?;
        let mut report = SweepReport::default();
        if due.is_empty() {
            return Ok(report);
        }

        let workers = self.config.workers.max(1);

        for tier in due.chunk_by(|a, b| a.retries == b.retries) {
            debug!(retries = tier[0].retries, count = tier.len(), "Probing backoff tier");

            let addresses: Vec<String> = tier.iter().map(|r| r.address.clone()).collect();
            let results = futures::stream::iter(addresses)
                .map(|address| async move {
                    match self.check(&address).await {
                        Ok(checked) => Some(checked.working),
                        Err(e) => {
                            warn!("Failed to record probe for {}: {}", address, e);
                            None
                        }
                    }
                })
                .buffer_unordered(workers)
                .collect::<Vec<Option<bool>>>()
                .await;

            for working in results.into_iter().flatten() {
                report.probed += 1;
                if working {
                    report.recommissioned += 1;
                } else {
                    report.failed += 1;
                }
            }
        }

        if report.recommissioned > 0 {
            self.context.pool().rebuild().await?;
        }

        Ok(report)
    }

    /// Run the health checker (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting health checker with {}ms sweep interval",
            self.config.sweep_interval.as_millis()
        );

        loop {
            tokio::select! {
                result = self.sweep(Utc::now()) => {
                    match result {
                        Ok(report) if report.probed > 0 => info!(
                            probed = report.probed,
                            recommissioned = report.recommissioned,
                            failed = report.failed,
                            "Health sweep complete"
                        ),
                        Ok(_) => {}
                        Err(e) => error!("Health sweep failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Health checker shutting down");
    }
}

/// Guard for managing health checker lifecycle
pub struct HealthCheckerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl HealthCheckerHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::testing::{seed_working, Script, ScriptedClient};
    use chrono::Duration as ChronoDuration;

    fn checker(client: Arc<ScriptedClient>, workers: usize) -> HealthChecker {
        HealthChecker::new(
            PoolContext::in_memory(),
            client,
            HealthCheckerConfig {
                sweep_interval: Duration::from_millis(10),
                workers,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_probe_classifies() {
        let client = Arc::new(ScriptedClient::new());
        client.healthy("1.1.1.1:80", 250);
        client.script(
            "2.2.2.2:80",
            Script::Fault(ProxyFault::Transparent("Via: 1.1 squid".into())),
        );
        client.script(
            "3.3.3.3:80",
            Script::Fault(ProxyFault::InvalidData("length mismatch".into())),
        );
        client.script("4.4.4.4:80", Script::Caller("unsupported scheme: ftp".into()));
        let checker = checker(client, 4);

        assert_eq!(checker.probe("1.1.1.1:80").await.unwrap(), Duration::from_millis(250));
        assert!(matches!(
            checker.probe("2.2.2.2:80").await,
            Err(RotorError::TransparentProxy(_))
        ));
        assert!(matches!(
            checker.probe("3.3.3.3:80").await,
            Err(RotorError::InvalidProxyData(_))
        ));
        assert!(matches!(
            checker.probe("4.4.4.4:80").await,
            Err(RotorError::InvalidProxy(_))
        ));
        assert!(matches!(
            checker.probe("5.5.5.5:80").await,
            Err(RotorError::InvalidProxy(_))
        ));
    }

    #[tokio::test]
    async fn test_admit_records_verdict() {
        let client = Arc::new(ScriptedClient::new());
        client.healthy("1.1.1.1:80", 400);
        let checker = checker(client, 4);

        let up = checker.admit("1.1.1.1:80").await.unwrap();
        assert!(up.working);
        assert_eq!(up.latency, Some(0.4));
        assert_eq!(up.successes, 1);

        let down = checker.admit("2.2.2.2:80").await.unwrap();
        assert!(!down.working);
        assert_eq!(down.retries, 1);
        assert_eq!(down.last_error.as_deref(), Some("proxy unreachable: connection refused"));

        assert!(matches!(
            checker.admit("1.1.1.1:80").await,
            Err(RotorError::DuplicateProxy(_))
        ));
    }

    #[tokio::test]
    async fn test_check_unknown_sends_nothing() {
        let client = Arc::new(ScriptedClient::new());
        let checker = checker(client.clone(), 4);

        assert!(matches!(
            checker.check("9.9.9.9:80").await,
            Err(RotorError::ProxyNotFound(_))
        ));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_check_drops_working_proxy_from_pool() {
        let client = Arc::new(ScriptedClient::new());
        let checker = checker(client.clone(), 4);
        seed_working(checker.context(), "1.1.1.1:80", 0.5, Utc::now()).await;
        assert_eq!(checker.context().pool().len().await.unwrap(), 1);

        client.refuse("1.1.1.1:80");
        let record = checker.check("1.1.1.1:80").await.unwrap();

        assert!(!record.working);
        assert_eq!(record.retries, 1);
        assert_eq!(checker.context().pool().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_recommissions_and_rebuilds() {
        let client = Arc::new(ScriptedClient::new());
        client.healthy("1.1.1.1:80", 300);
        let checker = checker(client.clone(), 4);

        checker.context().ledger().register("1.1.1.1:80").await.unwrap();
        checker.context().ledger().register("2.2.2.2:80").await.unwrap();

        let report = checker.sweep(Utc::now()).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                probed: 2,
                recommissioned: 1,
                failed: 1
            }
        );

        let pool = checker.context().pool().entries().await.unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].address, "1.1.1.1:80");

        // 2.2.2.2 now waits out its first backoff tier
        let report = checker.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.probed, 0);
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_visits_lower_tiers_first() {
        let client = Arc::new(ScriptedClient::new());
        let checker = checker(client.clone(), 1);
        let ledger = checker.context().ledger();
        let long_ago = Utc::now() - ChronoDuration::days(30);
        let refused = ProbeVerdict::Faulty(ProxyFault::Unreachable("refused".into()));

        ledger.register("3.3.3.3:80").await.unwrap();
        for _ in 0..2 {
            ledger
                .record_probe_result("3.3.3.3:80", &refused, long_ago)
                .await
                .unwrap();
        }
        ledger.register("4.4.4.4:80").await.unwrap();

        checker.sweep(Utc::now()).await.unwrap();
        assert_eq!(client.calls(), vec!["4.4.4.4:80", "3.3.3.3:80"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let client = Arc::new(ScriptedClient::new());
        let checker = Arc::new(checker(client, 4));
        let (handle, rx) = HealthCheckerHandle::new();

        let task = tokio::spawn({
            let checker = checker.clone();
            async move { checker.run(rx).await }
        });

        checker.context().ledger().register("1.1.1.1:80").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        let record = checker.context().ledger().get("1.1.1.1:80").await.unwrap();
        assert_eq!(record.retries, 1);
    }
}
