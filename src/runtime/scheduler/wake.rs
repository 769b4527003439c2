//! Wake inbox for task wakers.
//!
//! A task's [`Waker`] may be cloned into anything, including another thread,
//! so wakes do not touch scheduler state directly. They push the task id
//! into a shared inbox that the scheduler applies on the loop thread.

use crate::types::TaskId;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Wake, Waker};

/// Thread-safe queue of woken task ids.
#[derive(Debug, Default)]
pub struct WakeInbox {
    pending: AtomicBool,
    woken: Mutex<SmallVec<[TaskId; 8]>>,
}

impl WakeInbox {
    /// Creates an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a wake for `task`.
    pub fn push(&self, task: TaskId) {
        self.woken.lock().push(task);
        self.pending.store(true, Ordering::Release);
    }

    /// True if wakes are waiting to be applied.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Takes every recorded wake in arrival order.
    pub fn drain(&self) -> SmallVec<[TaskId; 8]> {
        if !self.has_pending() {
            return SmallVec::new();
        }
        let mut woken = self.woken.lock();
        self.pending.store(false, Ordering::Release);
        std::mem::take(&mut *woken)
    }
}

struct TaskWaker {
    task: TaskId,
    inbox: Arc<WakeInbox>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.inbox.push(self.task);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.inbox.push(self.task);
    }
}

/// Builds the waker handed to `task` on every poll.
pub(crate) fn task_waker(task: TaskId, inbox: &Arc<WakeInbox>) -> Waker {
    Waker::from(Arc::new(TaskWaker {
        task,
        inbox: Arc::clone(inbox),
    }))
}
