use serde::{Deserialize, Serialize};

/// Initial latency ceiling in seconds
pub const DEFAULT_LATENCY_CEILING: f64 = 2.25;
/// Initial reliability floor
pub const DEFAULT_RELIABILITY_FLOOR: f64 = 0.875;
/// Loosening never raises the latency ceiling past one day
pub const MAX_LATENCY_CEILING: f64 = 86_400.0;

/// Pool-wide admission thresholds. Always read and replaced as one pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Highest acceptable probe latency, exclusive
    pub latency_ceiling: f64,
    /// Lowest acceptable reliability, exclusive
    pub reliability_floor: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            latency_ceiling: DEFAULT_LATENCY_CEILING,
            reliability_floor: DEFAULT_RELIABILITY_FLOOR,
        }
    }
}

impl Thresholds {
    pub fn new(latency_ceiling: f64, reliability_floor: f64) -> Self {
        Self {
            latency_ceiling,
            reliability_floor,
        }
    }

    /// Whether a proxy with these measurements is eligible for selection
    pub fn admits(&self, latency: f64, reliability: f64) -> bool {
        latency < self.latency_ceiling && reliability > self.reliability_floor
    }

    /// More lenient pair: the latency ceiling doubles up to `MAX_LATENCY_CEILING` and the reliability floor
    /// descends by `floor² / 2`. The quadratic step shrinks as the floor nears zero
    /// and the 4-decimal rounding stalls it at a small fixed point, so it never goes negative.
    pub fn loosened(&self) -> Self {
        let floor = self.reliability_floor;
        Self {
            latency_ceiling: (self.latency_ceiling * 2.0).min(MAX_LATENCY_CEILING),
            reliability_floor: round4(floor - floor * floor * 0.5),
        }
    }

    /// Stricter pair: the latency ceiling halves and the reliability floor
    /// closes half the remaining distance to 1.
    pub fn tightened(&self) -> Self {
        Self {
            latency_ceiling: self.latency_ceiling * 0.5,
            reliability_floor: 0.5 * self.reliability_floor + 0.5,
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
