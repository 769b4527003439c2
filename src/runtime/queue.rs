//! Prioritized callback lanes.
//!
//! Four FIFO lanes hold plain callbacks:
//!
//! | Lane        | Drained                                                   |
//! |-------------|-----------------------------------------------------------|
//! | `Tick`      | snapshot batches, before microtasks, after every phase    |
//! | `Microtask` | to exhaustion (bounded by the microtask cap)              |
//! | `Immediate` | snapshot batches in the check phase, urgent lanes between |
//! | `Deferred`  | one snapshot per cycle, only when nothing else is pending |
//!
//! [`TaskQueue`] is plain data. The drain functions take the queue's
//! `RefCell` and release the borrow around every callback, so a running
//! callback can schedule more work on any lane.

use crate::error::{CallbackResult, Error, Result};
use crate::tracing_compat::{trace, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

/// A queued callback.
pub(crate) type Callback = Box<dyn FnOnce() -> CallbackResult>;

/// Callback lanes in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Lane {
    /// Highest priority; drained before microtasks after every phase.
    Tick,
    /// Drained to exhaustion after ticks.
    Microtask,
    /// Drained in the check phase.
    Immediate,
    /// Drained in the close phase when the loop is otherwise quiet.
    Deferred,
}

impl Lane {
    /// All lanes, highest priority first.
    pub const ALL: [Self; 4] = [Self::Tick, Self::Microtask, Self::Immediate, Self::Deferred];

    const fn index(self) -> usize {
        match self {
            Self::Tick => 0,
            Self::Microtask => 1,
            Self::Immediate => 2,
            Self::Deferred => 3,
        }
    }

    /// Lower-case lane name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Microtask => "microtask",
            Self::Immediate => "immediate",
            Self::Deferred => "deferred",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of draining the urgent lanes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Callbacks executed.
    pub executed: usize,
    /// True if the microtask drain stopped at its iteration cap with entries
    /// still queued.
    pub microtask_cap_hit: bool,
}

impl DrainReport {
    /// True if at least one callback ran.
    #[must_use]
    pub const fn did_work(&self) -> bool {
        self.executed > 0
    }
}

/// Four FIFO callback lanes.
pub struct TaskQueue {
    lanes: [VecDeque<Callback>; 4],
    microtask_cap: usize,
}

impl TaskQueue {
    /// Creates empty lanes with the given microtask iteration cap.
    #[must_use]
    pub fn new(microtask_cap: usize) -> Self {
        Self {
            lanes: Default::default(),
            microtask_cap: microtask_cap.max(1),
        }
    }

    /// Appends a callback to `lane`.
    pub(crate) fn push(&mut self, lane: Lane, callback: Callback) {
        self.lanes[lane.index()].push_back(callback);
    }

    fn pop(&mut self, lane: Lane) -> Option<Callback> {
        self.lanes[lane.index()].pop_front()
    }

    /// Number of callbacks queued on `lane`.
    #[must_use]
    pub fn len(&self, lane: Lane) -> usize {
        self.lanes[lane.index()].len()
    }

    /// Total callbacks queued across all lanes.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    /// True if any lane holds a callback.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.lanes.iter().any(|lane| !lane.is_empty())
    }

    /// True if the tick or microtask lane holds a callback.
    #[must_use]
    pub fn has_urgent(&self) -> bool {
        !self.lanes[Lane::Tick.index()].is_empty() || !self.lanes[Lane::Microtask.index()].is_empty()
    }

    /// True if any lane except `Deferred` holds a callback.
    #[must_use]
    pub fn has_non_deferred(&self) -> bool {
        self.has_urgent() || !self.lanes[Lane::Immediate.index()].is_empty()
    }

    /// The microtask iteration cap.
    #[must_use]
    pub const fn microtask_cap(&self) -> usize {
        self.microtask_cap
    }

    /// Removes every queued callback and returns them for the caller to drop
    /// outside any borrow.
    pub(crate) fn take_all(&mut self) -> Vec<Callback> {
        self.lanes.iter_mut().flat_map(std::mem::take).collect()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("tick", &self.len(Lane::Tick))
            .field("microtask", &self.len(Lane::Microtask))
            .field("immediate", &self.len(Lane::Immediate))
            .field("deferred", &self.len(Lane::Deferred))
            .field("microtask_cap", &self.microtask_cap)
            .finish()
    }
}

fn invoke(lane: Lane, callback: Callback) -> Result<()> {
    callback().map_err(|source| Error::Callback { lane, source })
}

// The borrow ends with the statement, before the callback runs.
fn pop_from(queue: &RefCell<TaskQueue>, lane: Lane) -> Option<Callback> {
    queue.borrow_mut().pop(lane)
}

/// Runs at most `limit` callbacks from the front of `lane`.
fn run_batch(queue: &RefCell<TaskQueue>, lane: Lane, limit: usize) -> Result<usize> {
    let mut executed = 0;
    while executed < limit {
        let Some(callback) = pop_from(queue, lane) else {
            break;
        };
        executed += 1;
        invoke(lane, callback)?;
    }
    Ok(executed)
}

/// Drains the tick and microtask lanes.
///
/// Ticks run in snapshot batches: ticks queued by a tick wait for the next
/// batch. Once the tick lane is empty the microtask lane is drained to
/// exhaustion, including microtasks queued while draining. The two repeat
/// until both lanes are empty. A microtask drain that reaches the cap stops
/// the whole drain, leaves the remainder queued and reports it.
pub(crate) fn drain_urgent(queue: &RefCell<TaskQueue>) -> Result<DrainReport> {
    let mut report = DrainReport::default();
    loop {
        let (ticks, microtasks, cap) = {
            let q = queue.borrow();
            (q.len(Lane::Tick), q.len(Lane::Microtask), q.microtask_cap)
        };
        if ticks > 0 {
            report.executed += run_batch(queue, Lane::Tick, ticks)?;
            continue;
        }
        if microtasks == 0 {
            return Ok(report);
        }
        let ran = run_batch(queue, Lane::Microtask, cap)?;
        report.executed += ran;
        if ran == cap && queue.borrow().len(Lane::Microtask) > 0 {
            warn!(
                cap,
                remaining = queue.borrow().len(Lane::Microtask),
                "microtask drain hit its iteration cap"
            );
            report.microtask_cap_hit = true;
            return Ok(report);
        }
    }
}

/// Runs the immediate callbacks queued at entry. Immediates queued while the
/// batch runs wait for the next batch.
pub(crate) fn drain_immediate_batch(queue: &RefCell<TaskQueue>) -> Result<usize> {
    let snapshot = queue.borrow().len(Lane::Immediate);
    if snapshot == 0 {
        return Ok(0);
    }
    trace!(count = snapshot, "draining immediate batch");
    run_batch(queue, Lane::Immediate, snapshot)
}

/// Runs the deferred callbacks queued at entry.
pub(crate) fn drain_deferred(queue: &RefCell<TaskQueue>) -> Result<usize> {
    let snapshot = queue.borrow().len(Lane::Deferred);
    if snapshot == 0 {
        return Ok(0);
    }
    trace!(count = snapshot, "draining deferred snapshot");
    run_batch(queue, Lane::Deferred, snapshot)
}
