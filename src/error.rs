//! Error types for the event loop.
//!
//! Every failure raised by user code (a callback, a timer, a task or a work
//! source callback) propagates out of [`EventLoop::run`] and
//! [`EventLoop::run_once`] unchanged. The scheduler finishes its own
//! bookkeeping for the failing item first, so the loop stays consistent and
//! can be driven again after the caller has handled the error.
//!
//! [`EventLoop::run`]: crate::runtime::EventLoop::run
//! [`EventLoop::run_once`]: crate::runtime::EventLoop::run_once

use crate::runtime::queue::Lane;
use crate::types::{TaskId, TimerId};
use std::io;

/// Boxed error returned by user callbacks and tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type of every user callback and task body.
pub type CallbackResult = std::result::Result<(), BoxError>;

/// Result alias for fallible loop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the event loop.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A tick, microtask, immediate or deferred callback failed.
    #[error("{lane} callback failed: {source}")]
    Callback {
        /// Lane the callback was queued on.
        lane: Lane,
        /// The callback's error.
        source: BoxError,
    },

    /// A timer callback failed. The timer was already removed (one-shot or
    /// exhausted periodic) or rescheduled when this is reported.
    #[error("timer {id} callback failed: {source}")]
    TimerCallback {
        /// The failing timer.
        id: TimerId,
        /// The callback's error.
        source: BoxError,
    },

    /// A cooperative task finished with an error. The task has been dropped
    /// from the scheduler; other tasks are unaffected.
    #[error("task {id} failed: {source}")]
    Task {
        /// The failing task.
        id: TaskId,
        /// The task's error.
        source: BoxError,
    },

    /// A callback registered with a work source failed.
    #[error("{source_name} source callback failed: {source}")]
    SourceCallback {
        /// Name of the work source that ran the callback.
        source_name: &'static str,
        /// The callback's error.
        source: BoxError,
    },

    /// The requested capability is unavailable on this platform.
    #[error("{capability} is not supported on this platform")]
    Unsupported {
        /// Human readable capability name.
        capability: &'static str,
    },

    /// `run`/`run_once` was called from inside a running cycle.
    #[error("event loop is already running a cycle")]
    Reentrant,

    /// An OS-level I/O error from a work source.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Invalid loop configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if this error was raised by user code rather than by the
    /// loop or the OS.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Callback { .. }
                | Self::TimerCallback { .. }
                | Self::Task { .. }
                | Self::SourceCallback { .. }
        )
    }

    /// Returns true for [`Error::Unsupported`].
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Builds an error for a failing work source callback.
    pub(crate) fn source_callback(source_name: &'static str, source: BoxError) -> Self {
        Self::SourceCallback {
            source_name,
            source,
        }
    }
}
