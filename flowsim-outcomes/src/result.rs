//! Access result value types carried by outcome buckets

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of a single modeled access: success flag plus latency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessResult {
    /// Whether the access succeeded
    pub success: bool,
    /// Time the access took
    pub latency: Duration,
}

impl AccessResult {
    /// Successful access with the given latency
    pub fn ok(latency: Duration) -> Self {
        Self {
            success: true,
            latency,
        }
    }

    /// Failed access with the given latency
    pub fn failed(latency: Duration) -> Self {
        Self {
            success: false,
            latency,
        }
    }

    /// Sequential composition reducer: succeeds iff both succeed,
    /// latencies add.
    pub fn both(a: &Self, b: &Self) -> Self {
        Self {
            success: a.success && b.success,
            latency: a.latency + b.latency,
        }
    }

    /// Latency in fractional seconds
    pub fn latency_secs(&self) -> f64 {
        self.latency.as_secs_f64()
    }
}

/// Access result carrying a latency range instead of a point value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangedResult {
    /// Whether the access succeeded
    pub success: bool,
    /// Best-case latency
    pub min_latency: Duration,
    /// Most likely latency
    pub mode_latency: Duration,
    /// Worst-case latency
    pub max_latency: Duration,
}

impl RangedResult {
    /// Range collapsed to a single point
    pub fn point(success: bool, latency: Duration) -> Self {
        Self {
            success,
            min_latency: latency,
            mode_latency: latency,
            max_latency: latency,
        }
    }

    /// Sequential composition reducer: bounds add field-wise
    pub fn both(a: &Self, b: &Self) -> Self {
        Self {
            success: a.success && b.success,
            min_latency: a.min_latency + b.min_latency,
            mode_latency: a.mode_latency + b.mode_latency,
            max_latency: a.max_latency + b.max_latency,
        }
    }
}

impl From<RangedResult> for AccessResult {
    fn from(r: RangedResult) -> Self {
        Self {
            success: r.success,
            latency: r.mode_latency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_ands_success_and_adds_latency() {
        let a = AccessResult::ok(Duration::from_millis(3));
        let b = AccessResult::failed(Duration::from_millis(4));
        let c = AccessResult::both(&a, &b);
        assert!(!c.success);
        assert_eq!(c.latency, Duration::from_millis(7));
    }

    #[test]
    fn test_ranged_both_adds_bounds() {
        let a = RangedResult::point(true, Duration::from_millis(1));
        let b = RangedResult {
            success: true,
            min_latency: Duration::from_millis(2),
            mode_latency: Duration::from_millis(3),
            max_latency: Duration::from_millis(9),
        };
        let c = RangedResult::both(&a, &b);
        assert!(c.success);
        assert_eq!(c.min_latency, Duration::from_millis(3));
        assert_eq!(c.max_latency, Duration::from_millis(10));
    }
}
