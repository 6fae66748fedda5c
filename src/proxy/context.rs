//! Shared state handed to every component

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use crate::models::Thresholds;
use crate::proxy::backoff::BackoffSchedule;
use crate::proxy::ledger::ProxyLedger;
use crate::proxy::pool::ProxyPool;
use crate::store::{MemoryStore, ProxyStore};

/// Current admission thresholds. Readers always see a consistent pair.
#[derive(Debug)]
pub struct ThresholdState {
    current: ArcSwap<Thresholds>,
}

impl Default for ThresholdState {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

impl ThresholdState {
    pub fn new(initial: Thresholds) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn current(&self) -> Thresholds {
        **self.current.load()
    }

    /// Admit slower, less reliable proxies. Returns the new pair.
    pub fn increase_leniency(&self) -> Thresholds {
        let prev = self.current.rcu(|t| t.loosened());
        let next = prev.loosened();
        info!(
            latency_ceiling = next.latency_ceiling,
            reliability_floor = next.reliability_floor,
            "Thresholds loosened"
        );
        next
    }

    /// Admit only faster, more reliable proxies. Returns the new pair.
    pub fn decrease_leniency(&self) -> Thresholds {
        let prev = self.current.rcu(|t| t.tightened());
        let next = prev.tightened();
        info!(
            latency_ceiling = next.latency_ceiling,
            reliability_floor = next.reliability_floor,
            "Thresholds tightened"
        );
        next
    }
}

/// Ledger, pool and thresholds over one store
#[derive(Clone)]
pub struct PoolContext {
    ledger: ProxyLedger,
    pool: ProxyPool,
    thresholds: Arc<ThresholdState>,
}

impl PoolContext {
    pub fn new(
        store: Arc<dyn ProxyStore>,
        schedule: BackoffSchedule,
        initial: Thresholds,
    ) -> Self {
        Self {
            ledger: ProxyLedger::new(store.clone(), schedule),
            pool: ProxyPool::new(store),
            thresholds: Arc::new(ThresholdState::new(initial)),
        }
    }

    /// Context over a fresh in-memory store with default schedule and thresholds
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            BackoffSchedule::default(),
            Thresholds::default(),
        )
    }

    pub fn ledger(&self) -> &ProxyLedger {
        &self.ledger
    }

    pub fn pool(&self) -> &ProxyPool {
        &self.pool
    }

    pub fn thresholds(&self) -> &ThresholdState {
        &self.thresholds
    }
}
