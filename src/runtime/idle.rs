//! Idle sleep sizing.
//!
//! When a cycle did no work the loop sleeps before the next one. The sleep is
//! a fraction of the delay until the next timer, clamped so that it is never
//! long enough to miss a timer and never so long that polled sources (signal
//! flags, readiness, file metadata) go stale.

use crate::config::LoopConfig;
use std::time::Duration;

/// Default upper bound on one idle sleep.
#[cfg(windows)]
pub const DEFAULT_SLEEP_CEILING: Duration = Duration::from_millis(1);
/// Default upper bound on one idle sleep.
#[cfg(not(windows))]
pub const DEFAULT_SLEEP_CEILING: Duration = Duration::from_millis(10);

/// Default lower bound on one idle sleep.
pub const DEFAULT_SLEEP_FLOOR: Duration = Duration::from_micros(100);

/// Default share of the next timer delay to sleep for.
pub const DEFAULT_TIMER_SLEEP_RATIO: f64 = 0.9;

/// Computes idle sleep durations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleSleepController {
    ceiling: Duration,
    floor: Duration,
    ratio: f64,
}

impl IdleSleepController {
    /// Creates a controller with explicit bounds.
    #[must_use]
    pub fn new(floor: Duration, ceiling: Duration, ratio: f64) -> Self {
        Self {
            ceiling: ceiling.max(floor),
            floor,
            ratio: ratio.clamp(0.0, 1.0),
        }
    }

    /// Creates a controller from the loop configuration.
    #[must_use]
    pub fn from_config(config: &LoopConfig) -> Self {
        Self::new(config.sleep_floor, config.sleep_ceiling, config.timer_sleep_ratio)
    }

    /// How long to sleep before the next cycle.
    ///
    /// Zero if work is immediately runnable. Without timers, the ceiling.
    /// Otherwise `ratio × next_timer_delay` clamped to `[floor, ceiling]`.
    #[must_use]
    pub fn next_sleep_duration(
        &self,
        has_immediate_work: bool,
        next_timer_delay: Option<Duration>,
    ) -> Duration {
        if has_immediate_work {
            return Duration::ZERO;
        }
        match next_timer_delay {
            None => self.ceiling,
            Some(delay) => delay.mul_f64(self.ratio).clamp(self.floor, self.ceiling),
        }
    }
}

impl Default for IdleSleepController {
    fn default() -> Self {
        Self::new(DEFAULT_SLEEP_FLOOR, DEFAULT_SLEEP_CEILING, DEFAULT_TIMER_SLEEP_RATIO)
    }
}
