//! Retry backoff for proxies that failed their last probe

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::ProxyRecord;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

/// Wait required since `last_used` before a failed proxy is probed again,
/// indexed by its consecutive failure count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    tiers: Vec<Duration>,
    overflow_step: Duration,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::new(
            [
                30,
                2 * MINUTE,
                5 * MINUTE,
                10 * MINUTE,
                30 * MINUTE,
                HOUR,
                5 * HOUR,
                DAY,
                3 * DAY,
            ]
            .into_iter()
            .map(Duration::from_secs)
            .collect(),
            Duration::from_secs(WEEK),
        )
    }
}

impl BackoffSchedule {
    /// Past the last tier the wait grows by `overflow_step` per extra retry.
    pub fn new(tiers: Vec<Duration>, overflow_step: Duration) -> Self {
        Self {
            tiers,
            overflow_step,
        }
    }

    pub fn tiers(&self) -> &[Duration] {
        &self.tiers
    }

    pub fn overflow_step(&self) -> Duration {
        self.overflow_step
    }

    /// Wait for a proxy that has failed `retries` probes in a row
    pub fn wait_for(&self, retries: i32) -> Duration {
        let retries = retries.max(0) as usize;
        match self.tiers.get(retries) {
            Some(wait) => *wait,
            None => {
                let beyond = (retries + 1 - self.tiers.len()) as u32;
                self.overflow_step.saturating_mul(beyond)
            }
        }
    }

    /// Whether a non-working record's backoff window has elapsed at `now`.
    /// A record that was never probed is always due.
    pub fn is_due(&self, record: &ProxyRecord, now: DateTime<Utc>) -> bool {
        if record.working {
            return false;
        }

        let Some(last_used) = record.last_used else {
            return true;
        };

        match (now - last_used).to_std() {
            Ok(elapsed) => elapsed >= self.wait_for(record.retries),
            // last_used lies in the future
            Err(_) => false,
        }
    }
}
