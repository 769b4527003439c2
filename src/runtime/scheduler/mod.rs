//! Cooperative task scheduler.
//!
//! Tasks are local futures stored in a slab. A task is polled once per task
//! phase while it is ready. When it returns `Pending` it is suspended and
//! stays suspended until something wakes it, either [`TaskScheduler::wake`]
//! with its id or its [`Waker`](std::task::Waker). The scheduler never polls
//! a suspended task speculatively, so a task that is never woken stays
//! suspended and keeps the loop alive.
//!
//! A wake that arrives while the task is being polled marks it notified; the
//! task is then re-queued behind the tasks already ready in that phase.

pub mod wake;

use crate::error::{CallbackResult, Error, Result};
use crate::runtime::stored_task::StoredTask;
use crate::tracing_compat::{debug, trace};
use crate::types::TaskId;
use hashbrown::HashSet;
use serde::Serialize;
use slab::Slab;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use wake::WakeInbox;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskState {
    /// Queued for the next task phase.
    Ready,
    /// Being polled right now.
    Running,
    /// Returned `Pending`; waits for a wake.
    Suspended,
    /// Finished, failed or discarded by a forced stop. Its slot is freed.
    Terminated,
}

/// Task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    /// Tasks queued for polling.
    pub ready: usize,
    /// Tasks waiting for a wake.
    pub suspended: usize,
    /// Tasks added and not yet finished.
    pub active: usize,
    /// Tasks that ran to completion or failed.
    pub completed: u64,
}

struct TaskSlot {
    generation: u32,
    state: TaskState,
    started: bool,
    notified: bool,
    // Taken out while the task is polled.
    task: Option<StoredTask>,
    waker: Waker,
}

/// Ready queue, suspended set and task storage.
pub struct TaskScheduler {
    slots: Slab<TaskSlot>,
    next_generation: u32,
    ready: VecDeque<TaskId>,
    suspended: HashSet<TaskId>,
    accepting: bool,
    completed: u64,
    inbox: Arc<WakeInbox>,
}

impl TaskScheduler {
    /// Creates an empty scheduler that accepts tasks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Slab::new(),
            next_generation: 0,
            ready: VecDeque::new(),
            suspended: HashSet::new(),
            accepting: true,
            completed: 0,
            inbox: Arc::new(WakeInbox::new()),
        }
    }

    /// Adds a task in the ready state.
    ///
    /// Returns `None` once [`TaskScheduler::prepare_shutdown`] was called;
    /// the future is dropped without being polled.
    pub(crate) fn add_task<F>(&mut self, future: F) -> Option<TaskId>
    where
        F: Future<Output = CallbackResult> + 'static,
    {
        if !self.accepting {
            trace!("task refused, scheduler is shutting down");
            return None;
        }
        self.next_generation = self.next_generation.wrapping_add(1);
        let generation = self.next_generation;
        let entry = self.slots.vacant_entry();
        let index = u32::try_from(entry.key()).ok()?;
        let id = TaskId::new(index, generation);
        entry.insert(TaskSlot {
            generation,
            state: TaskState::Ready,
            started: false,
            notified: false,
            task: Some(StoredTask::new(future)),
            waker: wake::task_waker(id, &self.inbox),
        });
        self.ready.push_back(id);
        trace!(task = %id, "task added");
        Some(id)
    }

    fn slot_mut(&mut self, id: TaskId) -> Option<&mut TaskSlot> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
    }

    /// Moves a suspended task to the ready queue.
    ///
    /// Waking a ready task is a no-op. Waking the task currently being
    /// polled re-queues it once the poll returns. Unknown and finished ids
    /// are ignored. Returns true if the task became ready.
    pub fn wake(&mut self, id: TaskId) -> bool {
        let Some(slot) = self.slot_mut(id) else {
            return false;
        };
        match slot.state {
            TaskState::Suspended => {
                slot.state = TaskState::Ready;
                self.suspended.remove(&id);
                self.ready.push_back(id);
                trace!(task = %id, "task woken");
                true
            }
            TaskState::Running => {
                slot.notified = true;
                false
            }
            TaskState::Ready | TaskState::Terminated => false,
        }
    }

    /// Applies wakes delivered through task wakers.
    pub fn apply_pending_wakes(&mut self) {
        for id in self.inbox.drain() {
            self.wake(id);
        }
    }

    /// State of a task this scheduler issued.
    ///
    /// Ids whose slot is gone report [`TaskState::Terminated`]. Returns
    /// `None` for ids this scheduler never issued.
    #[must_use]
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        let live = self
            .slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation());
        match live {
            Some(slot) => Some(slot.state),
            None if id.generation() != 0 && id.generation() <= self.next_generation => {
                Some(TaskState::Terminated)
            }
            None => None,
        }
    }

    /// True if any task has not finished yet.
    #[must_use]
    pub fn has_active_tasks(&self) -> bool {
        !self.slots.is_empty()
    }

    /// True if a task is ready or a waker fired since the last phase.
    #[must_use]
    pub fn has_ready_tasks(&self) -> bool {
        !self.ready.is_empty() || self.inbox.has_pending()
    }

    /// Tasks added and not yet finished.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.slots.len()
    }

    /// Counts by state.
    #[must_use]
    pub fn stats(&self) -> TaskStats {
        TaskStats {
            ready: self.ready.len(),
            suspended: self.suspended.len(),
            active: self.slots.len(),
            completed: self.completed,
        }
    }

    /// Refuses every later [`TaskScheduler::add_task`].
    pub fn prepare_shutdown(&mut self) {
        if self.accepting {
            debug!("task scheduler stopped accepting tasks");
        }
        self.accepting = false;
    }

    /// Accepts tasks again after a shutdown.
    pub fn resume_accepting(&mut self) {
        self.accepting = true;
    }

    /// True until [`TaskScheduler::prepare_shutdown`].
    #[must_use]
    pub const fn is_accepting(&self) -> bool {
        self.accepting
    }

    // Pops the next ready task and marks it running.
    fn begin_poll(&mut self) -> Option<(TaskId, StoredTask, Waker)> {
        while let Some(id) = self.ready.pop_front() {
            let Some(slot) = self.slot_mut(id) else {
                continue;
            };
            if slot.state != TaskState::Ready {
                continue;
            }
            let Some(task) = slot.task.take() else {
                continue;
            };
            slot.state = TaskState::Running;
            if slot.started {
                trace!(task = %id, "task resumed");
            } else {
                slot.started = true;
                trace!(task = %id, "task started");
            }
            return Some((id, task, slot.waker.clone()));
        }
        None
    }

    // Parks a task that returned `Pending`. Hands the body back if the task
    // was removed while it ran.
    fn park(&mut self, id: TaskId, task: StoredTask) -> Option<StoredTask> {
        let Some(slot) = self.slot_mut(id) else {
            return Some(task);
        };
        slot.task = Some(task);
        if std::mem::take(&mut slot.notified) {
            slot.state = TaskState::Ready;
            self.ready.push_back(id);
        } else {
            slot.state = TaskState::Suspended;
            self.suspended.insert(id);
            trace!(task = %id, "task suspended");
        }
        None
    }

    fn finish(&mut self, id: TaskId) {
        if self.slot_mut(id).is_some() {
            self.slots.remove(id.index() as usize);
            self.completed += 1;
        }
    }

    /// Removes every task, returning the bodies for dropping outside any
    /// borrow, and stops accepting new ones.
    pub(crate) fn take_all(&mut self) -> Vec<StoredTask> {
        self.prepare_shutdown();
        self.ready.clear();
        self.suspended.clear();
        let _ = self.inbox.drain();
        self.slots.drain().filter_map(|slot| slot.task).collect()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("stats", &self.stats())
            .field("accepting", &self.accepting)
            .finish_non_exhaustive()
    }
}

/// Polls every task that was ready when the phase started, once each.
///
/// Tasks made ready during the phase wait for the next one. A task that
/// fails is removed before its error is returned. Returns true if any task
/// was polled.
pub(crate) fn process_tasks(scheduler: &RefCell<TaskScheduler>) -> Result<bool> {
    let snapshot = {
        let mut scheduler = scheduler.borrow_mut();
        scheduler.apply_pending_wakes();
        scheduler.ready.len()
    };
    let mut progressed = false;
    for _ in 0..snapshot {
        let Some((id, mut task, waker)) = scheduler.borrow_mut().begin_poll() else {
            break;
        };
        progressed = true;
        let mut cx = Context::from_waker(&waker);
        let poll = task.poll(&mut cx);

        let mut guard = scheduler.borrow_mut();
        guard.apply_pending_wakes();
        match poll {
            Poll::Pending => {
                let orphan = guard.park(id, task);
                drop(guard);
                drop(orphan);
            }
            Poll::Ready(result) => {
                guard.finish(id);
                drop(guard);
                drop(task);
                if let Err(source) = result {
                    debug!(task = %id, "task failed");
                    return Err(Error::Task { id, source });
                }
                trace!(task = %id, "task completed");
            }
        }
    }
    Ok(progressed)
}
