//! Type-erased task storage.
//!
//! `StoredTask` boxes a local (non-`Send`) future whose output is the task's
//! completion status. The scheduler owns one per live task and takes it out
//! of its slot while polling, so the task body can call back into the loop.

use crate::error::CallbackResult;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A type-erased task body.
pub struct StoredTask {
    future: Pin<Box<dyn Future<Output = CallbackResult>>>,
}

impl StoredTask {
    /// Boxes a future as a task body.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = CallbackResult> + 'static,
    {
        Self {
            future: Box::pin(future),
        }
    }

    /// Polls the task body once.
    pub fn poll(&mut self, cx: &mut Context<'_>) -> Poll<CallbackResult> {
        self.future.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for StoredTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTask").finish_non_exhaustive()
    }
}
