//! Proxy rotation core
//!
//! This module provides:
//! - The ledger of every known proxy and the hot pool selection reads from
//! - Health checking with retry backoff
//! - Adaptive admission thresholds
//! - Request dispatch with failover, and the inbound listener feeding it

pub mod backoff;
pub mod client;
pub mod context;
pub mod dispatcher;
pub mod health;
pub mod ledger;
pub mod outcome;
pub mod pool;
pub mod server;
pub mod threshold;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::BackoffSchedule;
pub use client::{ForwardRequest, Forwarded, HttpProbeClient, ProbeClient};
pub use context::{PoolContext, ThresholdState};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use health::{HealthChecker, HealthCheckerConfig, HealthCheckerHandle, SweepReport};
pub use ledger::ProxyLedger;
pub use outcome::{Outcome, ProbeVerdict, ProxyFault};
pub use pool::ProxyPool;
pub use server::ProxyServer;
pub use threshold::{Calibration, ThresholdConfig, ThresholdController};
