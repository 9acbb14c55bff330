//! Virtual time and the canvas metric timeline

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

/// Virtual-time cursor for a system instance.
///
/// Runs on wall time by default; `advance` adds a manual skew so tests can
/// move simulated time without sleeping.
pub struct VirtualClock {
    inner: Mutex<ClockInner>,
}

struct ClockInner {
    base: Instant,
    skew: Duration,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClockInner {
                base: Instant::now(),
                skew: Duration::ZERO,
            }),
        }
    }

    /// Virtual elapsed time since creation or the last reset
    pub fn now(&self) -> Duration {
        let inner = self.inner.lock();
        inner.base.elapsed() + inner.skew
    }

    /// Move virtual time forward
    pub fn advance(&self, delta: Duration) {
        self.inner.lock().skew += delta;
    }

    /// Rewind to zero
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.base = Instant::now();
        inner.skew = Duration::ZERO;
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps virtual event time onto one wall timeline per canvas lifecycle.
///
/// Until a generator starts, metric timestamps use the wall clock. From the
/// first start on, every timestamp is the fixed simulation start plus the
/// event's virtual offset; `clear` (on reset or system swap) returns to the
/// wall clock. The timeline never mixes modes within one run.
pub struct Timeline {
    sim_start: RwLock<Option<DateTime<Utc>>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            sim_start: RwLock::new(None),
        }
    }

    /// Pin the simulation start; later calls keep the first value
    pub fn start(&self, at: DateTime<Utc>) {
        let mut guard = self.sim_start.write();
        if guard.is_none() {
            *guard = Some(at);
        }
    }

    /// Forget the simulation start (canvas reset)
    pub fn clear(&self) {
        *self.sim_start.write() = None;
    }

    /// True once a simulation start is pinned
    pub fn is_started(&self) -> bool {
        self.sim_start.read().is_some()
    }

    /// The pinned simulation start, if any
    pub fn simulation_start(&self) -> Option<DateTime<Utc>> {
        *self.sim_start.read()
    }

    /// Map a virtual offset to a timestamp on the active timeline
    pub fn map(&self, virtual_offset: Duration) -> DateTime<Utc> {
        match *self.sim_start.read() {
            Some(start) => {
                start
                    + chrono::Duration::from_std(virtual_offset)
                        .unwrap_or_else(|_| chrono::Duration::zero())
            }
            None => Utc::now(),
        }
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advance_and_reset() {
        let clock = VirtualClock::new();
        clock.advance(Duration::from_secs(5));
        assert!(clock.now() >= Duration::from_secs(5));
        clock.reset();
        assert!(clock.now() < Duration::from_secs(1));
    }

    #[test]
    fn test_timeline_pins_first_start() {
        let timeline = Timeline::new();
        assert!(!timeline.is_started());
        let t0 = Utc::now();
        timeline.start(t0);
        timeline.start(t0 + chrono::Duration::seconds(100));
        assert_eq!(timeline.simulation_start(), Some(t0));

        let mapped = timeline.map(Duration::from_secs(3));
        assert_eq!(mapped, t0 + chrono::Duration::seconds(3));

        timeline.clear();
        assert!(!timeline.is_started());
    }
}
