//! Activity tracking for idleness detection.
//!
//! Every cycle that did work records an activity. The tracker keeps an
//! exponentially weighted mean of the interval between activities; once
//! enough samples exist the idle threshold adapts to the loop's own rhythm.

use crate::types::Time;
use serde::Serialize;
use std::time::Duration;

const EWMA_ALPHA: f64 = 0.1;
const ADAPTIVE_MIN_SAMPLES: u64 = 100;
const ADAPTIVE_FLOOR: Duration = Duration::from_secs(1);
const ADAPTIVE_FACTOR: f64 = 10.0;

/// Snapshot of activity statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActivityStats {
    /// Recorded activities.
    pub activity_count: u64,
    /// Weighted mean interval between activities.
    pub mean_interval: Duration,
    /// Current idle threshold.
    pub idle_threshold: Duration,
}

/// Records loop activity and decides idleness.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    last_activity: Time,
    activity_count: u64,
    mean_interval_secs: f64,
    base_threshold: Duration,
}

impl ActivityTracker {
    /// Creates a tracker whose last activity is `now`.
    #[must_use]
    pub fn new(now: Time, base_threshold: Duration) -> Self {
        Self {
            last_activity: now,
            activity_count: 0,
            mean_interval_secs: 0.0,
            base_threshold,
        }
    }

    /// Records an activity at `now`.
    pub fn record(&mut self, now: Time) {
        let interval = now.duration_since(self.last_activity).as_secs_f64();
        self.mean_interval_secs = if self.activity_count == 0 {
            interval
        } else {
            EWMA_ALPHA.mul_add(interval, (1.0 - EWMA_ALPHA) * self.mean_interval_secs)
        };
        self.activity_count += 1;
        self.last_activity = now;
    }

    /// Threshold after which the loop counts as idle.
    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        if self.activity_count > ADAPTIVE_MIN_SAMPLES {
            let adaptive = Duration::from_secs_f64(self.mean_interval_secs * ADAPTIVE_FACTOR);
            adaptive.max(ADAPTIVE_FLOOR)
        } else {
            self.base_threshold
        }
    }

    /// True if nothing happened for longer than the threshold.
    #[must_use]
    pub fn is_idle(&self, now: Time) -> bool {
        now.duration_since(self.last_activity) > self.idle_threshold()
    }

    /// Time since the last activity.
    #[must_use]
    pub fn idle_for(&self, now: Time) -> Duration {
        now.duration_since(self.last_activity)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ActivityStats {
        ActivityStats {
            activity_count: self.activity_count,
            mean_interval: Duration::from_secs_f64(self.mean_interval_secs),
            idle_threshold: self.idle_threshold(),
        }
    }
}
