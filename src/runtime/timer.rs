//! Timer wheel for deadline management.
//!
//! Timers live in a min-heap of `(deadline, sequence)` entries backed by a
//! table of live records. Cancelling a timer only removes its record; the
//! heap entry stays behind as a tombstone and is discarded when it reaches
//! the top. When tombstones outnumber live timers (and pass a minimum) the
//! heap is rebuilt from the live table.
//!
//! Each call to [`fire_next`] runs at most one timer, so the loop can drain
//! the urgent lanes between two timer callbacks.

use crate::error::{CallbackResult, Error, Result};
use crate::tracing_compat::{debug, trace};
use crate::types::{IdAllocator, Time, TimerId};
use hashbrown::HashMap;
use serde::Serialize;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

/// Callback stored with a timer.
pub(crate) enum TimerCallback {
    Once(Box<dyn FnOnce() -> CallbackResult>),
    Repeating(Box<dyn FnMut() -> CallbackResult>),
}

impl std::fmt::Debug for TimerCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Once(_) => f.write_str("Once(..)"),
            Self::Repeating(_) => f.write_str("Repeating(..)"),
        }
    }
}

/// Kind of a live timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimerKind {
    /// Fires once and is removed.
    OneShot,
    /// Fires every `interval` until cancelled or `max_executions` is reached.
    Periodic {
        /// Interval between executions.
        interval: Duration,
        /// Execution limit, if any.
        max_executions: Option<u64>,
        /// Executions so far.
        execution_count: u64,
    },
}

impl TimerKind {
    /// True for periodic timers.
    #[must_use]
    pub const fn is_periodic(&self) -> bool {
        matches!(self, Self::Periodic { .. })
    }
}

/// Snapshot of a live timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerInfo {
    /// The timer.
    pub id: TimerId,
    /// Next deadline.
    pub deadline: Time,
    /// One-shot or periodic, with execution counts.
    pub kind: TimerKind,
    /// True if the deadline has passed.
    pub is_ready: bool,
}

/// Aggregate timer counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimerStats {
    /// Live one-shot timers.
    pub one_shot: usize,
    /// Live periodic timers.
    pub periodic: usize,
    /// Sum of executions of live periodic timers.
    pub periodic_executions: u64,
    /// Heap entries that no longer belong to a live timer.
    pub tombstones: usize,
}

impl TimerStats {
    /// Total live timers.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.one_shot + self.periodic
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct TimerEntry {
    deadline: Time,
    id: TimerId,
    sequence: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first, then
        // insertion order).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
pub(crate) struct TimerRecord {
    deadline: Time,
    sequence: u64,
    kind: TimerKind,
    // `None` while a periodic callback is running.
    callback: Option<TimerCallback>,
}

/// A timer taken off the heap and ready to run.
#[derive(Debug)]
pub(crate) struct FiringTimer {
    pub(crate) id: TimerId,
    pub(crate) callback: Option<TimerCallback>,
}

/// Min-heap of timers with tombstone cancellation.
#[derive(Debug)]
pub struct TimerWheel {
    heap: BinaryHeap<TimerEntry>,
    live: HashMap<TimerId, TimerRecord>,
    ids: IdAllocator,
    next_sequence: u64,
    tombstones: usize,
    rebuild_min: usize,
}

impl TimerWheel {
    /// Creates an empty wheel that rebuilds its heap once at least
    /// `rebuild_min` tombstones outnumber the live timers.
    #[must_use]
    pub fn new(rebuild_min: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            ids: IdAllocator::new(),
            next_sequence: 0,
            tombstones: 0,
            rebuild_min,
        }
    }

    /// Number of live timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True if no timer is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// True if `id` is live.
    #[must_use]
    pub fn contains(&self, id: TimerId) -> bool {
        self.live.contains_key(&id)
    }

    /// Heap entries, live and tombstoned.
    #[must_use]
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    /// Sequence number the next inserted entry will get. Entries inserted
    /// after this call compare greater or equal.
    #[must_use]
    pub const fn sequence_watermark(&self) -> u64 {
        self.next_sequence
    }

    fn push_entry(&mut self, id: TimerId, deadline: Time) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(TimerEntry {
            deadline,
            id,
            sequence,
        });
        sequence
    }

    fn insert(&mut self, deadline: Time, kind: TimerKind, callback: TimerCallback) -> TimerId {
        let id = TimerId::from_raw(self.ids.next());
        let sequence = self.push_entry(id, deadline);
        self.live.insert(
            id,
            TimerRecord {
                deadline,
                sequence,
                kind,
                callback: Some(callback),
            },
        );
        id
    }

    /// Adds a one-shot timer due at `now + delay`.
    pub(crate) fn add_timer(
        &mut self,
        now: Time,
        delay: Duration,
        callback: Box<dyn FnOnce() -> CallbackResult>,
    ) -> TimerId {
        let id = self.insert(now + delay, TimerKind::OneShot, TimerCallback::Once(callback));
        trace!(timer = %id, delay_us = delay.as_micros() as u64, "timer added");
        id
    }

    /// Adds a periodic timer first due at `now + interval`.
    ///
    /// A zero interval is raised to one nanosecond. `max_executions` of
    /// `Some(0)` allocates an id but schedules nothing.
    pub(crate) fn add_periodic_timer(
        &mut self,
        now: Time,
        interval: Duration,
        callback: Box<dyn FnMut() -> CallbackResult>,
        max_executions: Option<u64>,
    ) -> TimerId {
        if max_executions == Some(0) {
            return TimerId::from_raw(self.ids.next());
        }
        let interval = interval.max(Duration::from_nanos(1));
        let kind = TimerKind::Periodic {
            interval,
            max_executions,
            execution_count: 0,
        };
        let id = self.insert(now + interval, kind, TimerCallback::Repeating(callback));
        trace!(timer = %id, interval_us = interval.as_micros() as u64, "periodic timer added");
        id
    }

    /// Cancels a live timer. Returns `None` for unknown or finished timers,
    /// otherwise the removed callback so the caller can drop it outside any
    /// borrow.
    pub(crate) fn cancel(&mut self, id: TimerId) -> Option<Option<TimerCallback>> {
        let record = self.live.remove(&id)?;
        self.tombstones += 1;
        trace!(timer = %id, tombstones = self.tombstones, "timer cancelled");
        self.maybe_rebuild();
        Some(record.callback)
    }

    fn maybe_rebuild(&mut self) {
        if self.tombstones < self.rebuild_min || self.tombstones <= self.live.len() {
            return;
        }
        let before = self.heap.len();
        self.heap = self
            .live
            .iter()
            .map(|(&id, record)| TimerEntry {
                deadline: record.deadline,
                id,
                sequence: record.sequence,
            })
            .collect();
        self.tombstones = 0;
        debug!(before, after = self.heap.len(), "timer heap rebuilt");
    }

    // Pops tombstones until the top entry belongs to a live timer.
    fn purge_top(&mut self) {
        while let Some(top) = self.heap.peek() {
            let live = self
                .live
                .get(&top.id)
                .is_some_and(|record| record.sequence == top.sequence);
            if live {
                break;
            }
            self.heap.pop();
            self.tombstones = self.tombstones.saturating_sub(1);
        }
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Time> {
        self.purge_top();
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Time until the earliest live deadline, zero if already due.
    pub fn next_timer_delay(&mut self, now: Time) -> Option<Duration> {
        self.next_deadline().map(|deadline| deadline.duration_since(now))
    }

    /// True if a live timer is due at `now`.
    pub fn has_ready_timers(&mut self, now: Time) -> bool {
        self.next_deadline().is_some_and(|deadline| deadline <= now)
    }

    /// True if a live timer inserted before `watermark` is due at `now`.
    pub fn has_ready_before(&mut self, now: Time, watermark: u64) -> bool {
        self.purge_top();
        self.heap
            .peek()
            .is_some_and(|entry| entry.deadline <= now && entry.sequence < watermark)
    }

    /// Takes the earliest due timer off the heap.
    ///
    /// One-shot timers and periodic timers on their last execution are
    /// removed before their callback runs. Other periodic timers are
    /// rescheduled at `deadline + interval` and their callback is lent out
    /// until [`TimerWheel::restore`].
    pub(crate) fn take_ready(&mut self, now: Time, watermark: u64) -> Option<FiringTimer> {
        if !self.has_ready_before(now, watermark) {
            return None;
        }
        let entry = self.heap.pop()?;
        let record = self.live.get_mut(&entry.id)?;
        let reschedule = match &mut record.kind {
            TimerKind::OneShot => None,
            TimerKind::Periodic {
                interval,
                max_executions,
                execution_count,
            } => {
                *execution_count += 1;
                let more = max_executions.is_none_or(|max| *execution_count < max);
                more.then(|| record.deadline + *interval)
            }
        };
        let callback = if let Some(next) = reschedule {
            let callback = record.callback.take();
            record.deadline = next;
            let sequence = self.push_entry(entry.id, next);
            if let Some(record) = self.live.get_mut(&entry.id) {
                record.sequence = sequence;
            }
            callback
        } else {
            self.live.remove(&entry.id).and_then(|record| record.callback)
        };
        Some(FiringTimer {
            id: entry.id,
            callback,
        })
    }

    /// Returns a periodic callback after it ran. If the timer was cancelled
    /// meanwhile the callback is handed back for dropping.
    pub(crate) fn restore(&mut self, id: TimerId, callback: TimerCallback) -> Option<TimerCallback> {
        match self.live.get_mut(&id) {
            Some(record) if record.callback.is_none() => {
                record.callback = Some(callback);
                None
            }
            _ => Some(callback),
        }
    }

    /// Snapshot of a live timer.
    #[must_use]
    pub fn info(&self, id: TimerId, now: Time) -> Option<TimerInfo> {
        self.live.get(&id).map(|record| TimerInfo {
            id,
            deadline: record.deadline,
            kind: record.kind,
            is_ready: record.deadline <= now,
        })
    }

    /// Aggregate counts.
    #[must_use]
    pub fn stats(&self) -> TimerStats {
        let mut stats = TimerStats {
            tombstones: self.tombstones,
            ..TimerStats::default()
        };
        for record in self.live.values() {
            match record.kind {
                TimerKind::OneShot => stats.one_shot += 1,
                TimerKind::Periodic {
                    execution_count, ..
                } => {
                    stats.periodic += 1;
                    stats.periodic_executions += execution_count;
                }
            }
        }
        stats
    }

    /// Removes every timer and returns the records for dropping outside any
    /// borrow. Ids keep increasing afterwards.
    pub(crate) fn take_all(&mut self) -> Vec<TimerRecord> {
        self.heap.clear();
        self.tombstones = 0;
        self.live.drain().map(|(_, record)| record).collect()
    }
}

/// Fires the earliest due timer inserted before `watermark`.
///
/// Returns `Ok(false)` if none is due. A failing callback is reported after
/// the timer has been removed or rescheduled.
pub(crate) fn fire_next(wheel: &RefCell<TimerWheel>, now: Time, watermark: u64) -> Result<bool> {
    let Some(FiringTimer { id, callback }) = wheel.borrow_mut().take_ready(now, watermark) else {
        return Ok(false);
    };
    trace!(timer = %id, "timer fired");
    match callback {
        Some(TimerCallback::Once(callback)) => {
            callback().map_err(|source| Error::TimerCallback { id, source })?;
        }
        Some(TimerCallback::Repeating(mut callback)) => {
            let result = callback();
            let orphan = wheel
                .borrow_mut()
                .restore(id, TimerCallback::Repeating(callback));
            drop(orphan);
            result.map_err(|source| Error::TimerCallback { id, source })?;
        }
        None => {}
    }
    Ok(true)
}
