//! Time sources for the loop.
//!
//! The loop never reads the system clock directly. Every deadline, idle
//! decision and shutdown timeout goes through a [`TimeSource`], so tests can
//! substitute a [`VirtualClock`] and drive timers deterministically: sleeping
//! on a virtual clock advances it instead of blocking the thread.

use crate::types::Time;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A source of monotonic time for the loop.
pub trait TimeSource: Send + Sync + std::fmt::Debug {
    /// Current loop time.
    fn now(&self) -> Time;

    /// Blocks the loop thread for `duration`.
    ///
    /// Called when a cycle did no work and the idle controller asked for a
    /// pause, and between graceful-shutdown iterations.
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Monotonic clock backed by [`Instant`]. Time zero is the moment the clock
/// was created; `sleep` really blocks.
#[derive(Debug)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Starts a clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        Time::from_nanos(duration_to_nanos_saturating(self.epoch.elapsed()))
    }
}

/// Virtual time source for deterministic tests.
///
/// Time only moves when the test advances it or when the loop sleeps on it.
///
/// ```
/// use phaseloop::time::{TimeSource, VirtualClock};
/// use phaseloop::types::Time;
/// use std::time::Duration;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Time::ZERO);
///
/// clock.advance(Duration::from_secs(1));
/// assert_eq!(clock.now(), Time::from_secs(1));
///
/// clock.sleep(Duration::from_millis(5));
/// assert_eq!(clock.now(), Time::from_millis(1_005));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
    slept: AtomicU64,
}

impl VirtualClock {
    /// A clock frozen at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock frozen at `time`.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
            slept: AtomicU64::new(0),
        }
    }

    /// Advances time by `duration`.
    pub fn advance(&self, duration: Duration) {
        let nanos = duration_to_nanos_saturating(duration);
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(nanos))
            });
    }

    /// Moves the clock forward to `time`; earlier targets are ignored.
    pub fn advance_to(&self, time: Time) {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
    }

    /// Sets the current time, moving backwards if asked to.
    pub fn set(&self, time: Time) {
        self.now.store(time.as_nanos(), Ordering::Release);
    }

    /// Total time the loop has spent sleeping on this clock.
    #[must_use]
    pub fn total_slept(&self) -> Duration {
        Duration::from_nanos(self.slept.load(Ordering::Acquire))
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) {
        let nanos = duration_to_nanos_saturating(duration);
        self.slept.fetch_add(nanos, Ordering::AcqRel);
        self.advance(duration);
    }
}

#[inline]
fn duration_to_nanos_saturating(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
