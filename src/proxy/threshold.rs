//! Adaptive admission thresholds
//!
//! The controller watches how long the least recently used admitted proxy has
//! been resting. Proxies reused faster than the rest time mean the admitted set
//! is too small for demand, so the thresholds are loosened.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::error::Result;
use crate::proxy::context::PoolContext;

/// Threshold controller configuration
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    /// Optimal time a proxy rests between uses
    pub rest_time: Duration,
    /// Maximum adjustments in one cycle
    pub fall_through: u32,
    /// Pause between cycles
    pub interval: Duration,
    /// Tighten the thresholds when proxies rest much longer than needed
    pub tighten_when_idle: bool,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            rest_time: Duration::from_secs(5),
            fall_through: 10,
            interval: Duration::from_millis(500),
            tighten_when_idle: false,
        }
    }
}

/// State of the pool relative to the current thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Calibration {
    /// The pool has no entries at all
    Empty,
    /// Entries exist but none pass the thresholds
    Starved,
    /// The least recently used proxy is still resting
    Overused,
    Calibrated,
    /// Proxies rest well beyond the rest time, or were never used
    Underused,
    /// The last use lies at or after the observation time
    Indeterminate,
}

impl Calibration {
    pub fn wants_more_leniency(&self) -> bool {
        matches!(self, Calibration::Starved | Calibration::Overused)
    }
}

/// Classify the idle time of the least recently used admitted proxy
pub fn classify(idle_secs: Option<f64>, rest_secs: f64) -> Calibration {
    let Some(idle) = idle_secs else {
        return Calibration::Underused;
    };

    if idle <= 0.0 {
        Calibration::Indeterminate
    } else if idle < rest_secs {
        Calibration::Overused
    } else if idle < rest_secs * 1.2 {
        Calibration::Calibrated
    } else {
        Calibration::Underused
    }
}

pub struct ThresholdController {
    context: PoolContext,
    config: ThresholdConfig,
}

impl ThresholdController {
    pub fn new(context: PoolContext, config: ThresholdConfig) -> Self {
        Self { context, config }
    }

    /// Observe the pool under the current thresholds
    pub async fn assess(&self, now: DateTime<Utc>) -> Result<Calibration> {
        let thresholds = self.context.thresholds().current();

        match self.context.pool().least_recently_used(&thresholds).await? {
            Some(entry) => Ok(classify(
                entry.idle_seconds(now),
                self.config.rest_time.as_secs_f64(),
            )),
            None if self.context.pool().is_empty().await? => Ok(Calibration::Empty),
            None => Ok(Calibration::Starved),
        }
    }

    /// One controller cycle. Loosens while the pool is starved or overused, up to
    /// `fall_through` times, and returns the last observation.
    pub async fn calibrate(&self, now: DateTime<Utc>) -> Result<Calibration> {
        let mut calibration = self.assess(now).await?;

        for _ in 0..self.config.fall_through {
            if calibration.wants_more_leniency() {
                self.context.thresholds().increase_leniency();
            } else {
                if calibration == Calibration::Underused && self.config.tighten_when_idle {
                    self.context.thresholds().decrease_leniency();
                }
                return Ok(calibration);
            }
            calibration = self.assess(now).await?;
        }

        debug!(?calibration, "Fall-through bound reached");
        Ok(calibration)
    }

    /// Run the controller (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting threshold controller with {}s rest time",
            self.config.rest_time.as_secs_f64()
        );

        loop {
            if let Err(e) = self.calibrate(Utc::now()).await {
                error!("Threshold calibration failed: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Threshold controller shutting down");
    }
}
