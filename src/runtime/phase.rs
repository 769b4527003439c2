//! The fixed seven-phase cycle.
//!
//! ```text
//! 1 signal   poll signal-phase sources
//! 2 urgent   drain ticks and microtasks
//! 3 timers   fire due timers one at a time, urgent drain after each
//! 4 tasks    poll ready tasks, then urgent drain
//! 5 io       poll io-phase sources, urgent drain if any produced work
//! 6 check    immediate batches until the lane is empty, urgent drain after each
//! 7 close    one deferred snapshot if nothing else is pending, urgent drain
//! ```
//!
//! Timers only fire if they were due when the timer phase began and were
//! scheduled before it began; timers added or rescheduled during the phase
//! wait for the next cycle.

use crate::error::Result;
use crate::runtime::event_loop::LoopCore;
use crate::runtime::queue;
use crate::runtime::scheduler::process_tasks;
use crate::runtime::source::SourcePhase;
use crate::runtime::timer::fire_next;
use crate::tracing_compat::trace;
use serde::Serialize;

/// Phases of one cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    /// Signal-phase sources.
    Signal,
    /// Tick and microtask lanes.
    Urgent,
    /// Due timers.
    Timers,
    /// Ready tasks.
    Tasks,
    /// I/O-phase sources.
    Io,
    /// Immediate lane.
    Check,
    /// Deferred lane.
    Close,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Self; 7] = [
        Self::Signal,
        Self::Urgent,
        Self::Timers,
        Self::Tasks,
        Self::Io,
        Self::Check,
        Self::Close,
    ];

    /// Lower-case phase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Urgent => "urgent",
            Self::Timers => "timers",
            Self::Tasks => "tasks",
            Self::Io => "io",
            Self::Check => "check",
            Self::Close => "close",
        }
    }
}

/// Runs cycles over a loop's components.
pub struct PhaseOrchestrator<'a> {
    core: &'a LoopCore,
}

impl<'a> PhaseOrchestrator<'a> {
    pub(crate) const fn new(core: &'a LoopCore) -> Self {
        Self { core }
    }

    /// Runs one full cycle. Returns true if any phase did work.
    pub fn process_cycle(&self) -> Result<bool> {
        let mut worked = false;
        for phase in Phase::ALL {
            let did = self.run_phase(phase)?;
            if did {
                trace!(phase = phase.name(), "phase did work");
            }
            worked |= did;
        }
        Ok(worked)
    }

    fn run_phase(&self, phase: Phase) -> Result<bool> {
        match phase {
            Phase::Signal => self.poll_sources(SourcePhase::Signal),
            Phase::Urgent => self.drain_urgent(),
            Phase::Timers => self.timer_phase(),
            Phase::Tasks => {
                let polled = process_tasks(&self.core.tasks)?;
                Ok(self.drain_urgent()? || polled)
            }
            Phase::Io => {
                if self.poll_sources(SourcePhase::Io)? {
                    self.drain_urgent()?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Phase::Check => self.check_phase(),
            Phase::Close => self.close_phase(),
        }
    }

    fn drain_urgent(&self) -> Result<bool> {
        Ok(queue::drain_urgent(&self.core.queue)?.did_work())
    }

    fn poll_sources(&self, phase: SourcePhase) -> Result<bool> {
        let sources = self.core.sources.borrow().snapshot(phase);
        let mut worked = false;
        for source in sources {
            if !source.has_work() {
                continue;
            }
            if source.poll()? {
                trace!(source = source.name(), "source produced work");
                worked = true;
            }
        }
        Ok(worked)
    }

    fn timer_phase(&self) -> Result<bool> {
        let now = self.core.clock.now();
        let watermark = self.core.timers.borrow().sequence_watermark();
        let mut worked = false;
        while self.core.timers.borrow_mut().has_ready_before(now, watermark) {
            worked |= fire_next(&self.core.timers, now, watermark)?;
            self.drain_urgent()?;
        }
        Ok(worked)
    }

    fn check_phase(&self) -> Result<bool> {
        let mut worked = false;
        loop {
            let ran = queue::drain_immediate_batch(&self.core.queue)?;
            if ran == 0 {
                return Ok(worked);
            }
            worked = true;
            self.drain_urgent()?;
        }
    }

    fn close_phase(&self) -> Result<bool> {
        if self.core.has_work_besides_deferred() {
            return Ok(false);
        }
        let ran = queue::drain_deferred(&self.core.queue)?;
        if ran == 0 {
            return Ok(false);
        }
        self.drain_urgent()?;
        Ok(true)
    }
}
