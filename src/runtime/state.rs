//! Run state machine.
//!
//! ```text
//! Running ──stop()──▶ GracefulStopping ──force_stop() / timeout──▶ ForceStopped
//!    └──────────────────────force_stop()──────────────────────────────▲
//! ```
//!
//! `start()` re-arms a stopped machine.

use crate::tracing_compat::info;
use crate::types::Time;
use serde::Serialize;
use std::time::Duration;

/// Smallest graceful shutdown timeout accepted.
pub const MIN_GRACEFUL_TIMEOUT: Duration = Duration::from_millis(100);

/// Loop run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// Cycles keep running while there is work.
    Running,
    /// `stop()` was requested at `since`; remaining work gets a bounded
    /// window to finish.
    GracefulStopping {
        /// When the stop was requested.
        since: Time,
    },
    /// All pending work was discarded.
    ForceStopped,
}

/// Tracks the run state and the graceful shutdown deadline.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    state: RunState,
    graceful_timeout: Duration,
}

impl RunStateMachine {
    /// Creates a running machine. The timeout is raised to
    /// [`MIN_GRACEFUL_TIMEOUT`] if smaller.
    #[must_use]
    pub fn new(graceful_timeout: Duration) -> Self {
        Self {
            state: RunState::Running,
            graceful_timeout: graceful_timeout.max(MIN_GRACEFUL_TIMEOUT),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// True while `Running`.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    /// True while `GracefulStopping`.
    #[must_use]
    pub const fn is_in_graceful_shutdown(&self) -> bool {
        matches!(self.state, RunState::GracefulStopping { .. })
    }

    /// True once `ForceStopped`.
    #[must_use]
    pub const fn is_forced(&self) -> bool {
        matches!(self.state, RunState::ForceStopped)
    }

    /// Requests a graceful stop. Only a running machine transitions; returns
    /// true if it did.
    pub fn stop(&mut self, now: Time) -> bool {
        if !self.is_running() {
            return false;
        }
        self.state = RunState::GracefulStopping { since: now };
        info!(at = %now, "graceful stop requested");
        true
    }

    /// Moves to `ForceStopped` from any state. Returns true if the state
    /// changed.
    pub fn force_stop(&mut self) -> bool {
        if self.is_forced() {
            return false;
        }
        self.state = RunState::ForceStopped;
        info!("force stop");
        true
    }

    /// Re-arms the machine to `Running`.
    pub fn start(&mut self) {
        self.state = RunState::Running;
    }

    /// True if graceful stopping has lasted longer than the timeout.
    #[must_use]
    pub fn should_force_shutdown(&self, now: Time) -> bool {
        match self.state {
            RunState::GracefulStopping { since } => now.duration_since(since) > self.graceful_timeout,
            _ => false,
        }
    }

    /// Time spent in graceful stopping; zero in any other state.
    #[must_use]
    pub fn time_since_stop(&self, now: Time) -> Duration {
        match self.state {
            RunState::GracefulStopping { since } => now.duration_since(since),
            _ => Duration::ZERO,
        }
    }

    /// Graceful shutdown timeout.
    #[must_use]
    pub const fn graceful_timeout(&self) -> Duration {
        self.graceful_timeout
    }

    /// Sets the graceful shutdown timeout, raised to
    /// [`MIN_GRACEFUL_TIMEOUT`] if smaller.
    pub fn set_graceful_timeout(&mut self, timeout: Duration) {
        self.graceful_timeout = timeout.max(MIN_GRACEFUL_TIMEOUT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_only_from_running() {
        let mut machine = RunStateMachine::new(Duration::from_secs(2));
        assert!(machine.stop(Time::from_secs(1)));
        assert!(!machine.stop(Time::from_secs(2)));
        assert_eq!(
            machine.state(),
            RunState::GracefulStopping {
                since: Time::from_secs(1)
            }
        );
        assert!(machine.force_stop());
        assert!(!machine.stop(Time::from_secs(3)));
        assert!(machine.is_forced());
    }

    #[test]
    fn force_after_timeout_elapses() {
        let mut machine = RunStateMachine::new(Duration::from_millis(500));
        assert!(!machine.should_force_shutdown(Time::from_secs(100)));
        machine.stop(Time::from_secs(1));
        assert!(!machine.should_force_shutdown(Time::from_millis(1_500)));
        assert!(machine.should_force_shutdown(Time::from_millis(1_501)));
        assert_eq!(
            machine.time_since_stop(Time::from_millis(1_200)),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn timeout_has_a_floor() {
        let mut machine = RunStateMachine::new(Duration::from_millis(1));
        assert_eq!(machine.graceful_timeout(), MIN_GRACEFUL_TIMEOUT);
        machine.set_graceful_timeout(Duration::from_secs(3));
        assert_eq!(machine.graceful_timeout(), Duration::from_secs(3));
        machine.set_graceful_timeout(Duration::ZERO);
        assert_eq!(machine.graceful_timeout(), MIN_GRACEFUL_TIMEOUT);
    }

    #[test]
    fn start_rearms() {
        let mut machine = RunStateMachine::new(Duration::from_secs(2));
        machine.force_stop();
        machine.start();
        assert!(machine.is_running());
        assert_eq!(machine.time_since_stop(Time::from_secs(9)), Duration::ZERO);
    }
}
