use std::fmt;
use std::net::SocketAddrV4;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{Result, RotorError};

/// A validated `ipv4:port` proxy address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyAddress(SocketAddrV4);

impl ProxyAddress {
    /// Parse and validate an address. Every octet must be in range and the port non-zero.
    pub fn parse(raw: &str) -> Result<Self> {
        let addr = SocketAddrV4::from_str(raw)
            .map_err(|_| RotorError::InvalidAddress(raw.to_string()))?;

        if addr.port() == 0 {
            return Err(RotorError::InvalidAddress(raw.to_string()));
        }

        Ok(Self(addr))
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProxyAddress {
    type Err = RotorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Fraction of successful probes/uses. A proxy with no observations counts as fully reliable.
pub fn reliability(successes: i64, fails: i64) -> f64 {
    let total = successes + fails;
    if total <= 0 {
        1.0
    } else {
        successes as f64 / total as f64
    }
}

/// Ledger row: every proxy ever registered, with its lifetime health counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProxyRecord {
    pub address: String,
    /// Seconds taken by the last successful probe
    pub latency: Option<f64>,
    pub last_used: Option<DateTime<Utc>>,
    pub working: bool,
    /// Consecutive failed probes since the last success
    pub retries: i32,
    pub successes: i64,
    pub fails: i64,
    pub reliability: f64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ProxyRecord {
    /// A freshly registered proxy: not working, never probed
    pub fn new(address: &ProxyAddress, now: DateTime<Utc>) -> Self {
        Self {
            address: address.to_string(),
            latency: None,
            last_used: None,
            working: false,
            retries: 0,
            successes: 0,
            fails: 0,
            reliability: reliability(0, 0),
            last_error: None,
            created_at: now,
        }
    }

    /// Apply a successful probe
    pub fn mark_probe_success(&mut self, latency: f64, now: DateTime<Utc>) {
        self.latency = Some(latency);
        self.last_used = Some(now);
        self.working = true;
        self.retries = 0;
        self.last_error = None;
        self.successes += 1;
        self.reliability = reliability(self.successes, self.fails);
    }

    /// Apply a failed probe
    pub fn mark_probe_failure(&mut self, error: String, now: DateTime<Utc>) {
        self.last_used = Some(now);
        self.working = false;
        self.retries += 1;
        self.last_error = Some(error);
        self.fails += 1;
        self.reliability = reliability(self.successes, self.fails);
    }

    /// Count a successful dispatch through this proxy
    pub fn mark_dispatch_success(&mut self) {
        self.successes += 1;
        self.reliability = reliability(self.successes, self.fails);
    }

    /// Projection into the hot pool. Only working proxies with a measured latency qualify.
    pub fn pool_entry(&self) -> Option<PoolEntry> {
        if !self.working {
            return None;
        }

        Some(PoolEntry {
            address: self.address.clone(),
            latency: self.latency?,
            last_used: self.last_used,
            successes: self.successes,
            fails: self.fails,
            reliability: self.reliability,
        })
    }
}

/// Hot pool row: read-optimized projection of a working ledger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PoolEntry {
    pub address: String,
    pub latency: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub successes: i64,
    pub fails: i64,
    pub reliability: f64,
}

impl PoolEntry {
    pub fn mark_dispatch_success(&mut self) {
        self.successes += 1;
        self.reliability = reliability(self.successes, self.fails);
    }

    /// Seconds since the entry was last used, `None` if never used
    pub fn idle_seconds(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_used
            .map(|used| (now - used).num_milliseconds() as f64 / 1000.0)
    }
}

/// Ledger size summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    pub total: i64,
    pub working: i64,
}
