//! Filesystem operations and path watchers.
//!
//! [`FileSource`] queues [`FileOp`]s and runs them during the I/O phase.
//! Plain operations complete within one poll; streaming reads, writes and
//! copies move one chunk per poll so large files do not stall the loop.
//! A cancelled operation never runs its callback. Cancelling a streaming
//! write halfway leaves the truncated file behind.
//!
//! Path watchers compare metadata on an interval measured with the loop's
//! clock and report [`WatchEvent`]s.

mod operation;
mod watcher;

pub use operation::{DEFAULT_CHUNK_SIZE, FileOp, FileOpOptions, FileOutput, FileStat};
pub use watcher::{DEFAULT_WATCH_INTERVAL, WatchEvent, WatchOptions};

use crate::error::{CallbackResult, Error, Result};
use crate::runtime::source::WorkSource;
use crate::time::TimeSource;
use crate::tracing_compat::{debug, trace};
use crate::types::{IdAllocator, OperationId, WatcherId};
use hashbrown::HashMap;
use operation::Transfer;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use watcher::PathState;

type OpCallback = Box<dyn FnOnce(io::Result<FileOutput>) -> CallbackResult>;
type WatchCallback = Rc<RefCell<Box<dyn FnMut(WatchEvent, &Path) -> CallbackResult>>>;

enum Stage {
    Queued(FileOp),
    Streaming(Transfer),
}

struct Operation {
    stage: Stage,
    options: FileOpOptions,
    callback: OpCallback,
}

struct PathWatcher {
    state: PathState,
    callback: WatchCallback,
}

#[derive(Default)]
struct Registry {
    ids: IdAllocator,
    order: VecDeque<OperationId>,
    operations: HashMap<OperationId, Operation>,
    watchers: Vec<(WatcherId, PathWatcher)>,
}

enum Step {
    Finished(OpCallback, io::Result<FileOutput>),
    Continue(Operation),
}

/// Work source for filesystem operations and path watchers.
pub struct FileSource {
    clock: Arc<dyn TimeSource>,
    registry: RefCell<Registry>,
}

impl FileSource {
    /// Creates a source whose watchers are timed by `clock`, normally the
    /// loop's [`LoopHandle::clock`](crate::runtime::LoopHandle::clock).
    #[must_use]
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            registry: RefCell::new(Registry::default()),
        }
    }

    /// Queues `op` with default options. `callback` receives the outcome;
    /// I/O failures are delivered to it, not raised by the loop.
    pub fn submit<F>(&self, op: FileOp, callback: F) -> OperationId
    where
        F: FnOnce(io::Result<FileOutput>) -> CallbackResult + 'static,
    {
        self.submit_with(op, FileOpOptions::default(), callback)
    }

    /// Queues `op` with explicit options.
    pub fn submit_with<F>(&self, op: FileOp, options: FileOpOptions, callback: F) -> OperationId
    where
        F: FnOnce(io::Result<FileOutput>) -> CallbackResult + 'static,
    {
        let mut registry = self.registry.borrow_mut();
        let id = OperationId::from_raw(registry.ids.next());
        trace!(op = %id, kind = op.name(), streaming = options.streaming, "file operation queued");
        registry.order.push_back(id);
        registry.operations.insert(
            id,
            Operation {
                stage: Stage::Queued(op),
                options,
                callback: Box::new(callback),
            },
        );
        id
    }

    /// Cancels a queued or streaming operation; its callback never runs.
    /// Returns false for unknown or completed operations.
    pub fn cancel(&self, id: OperationId) -> bool {
        let removed = {
            let mut registry = self.registry.borrow_mut();
            let removed = registry.operations.remove(&id);
            if removed.is_some() {
                registry.order.retain(|queued| *queued != id);
            }
            removed
        };
        let cancelled = removed.is_some();
        if cancelled {
            debug!(op = %id, "file operation cancelled");
        }
        drop(removed);
        cancelled
    }

    /// Watches `path` for changes.
    pub fn add_watcher<F>(
        &self,
        path: impl Into<PathBuf>,
        options: WatchOptions,
        callback: F,
    ) -> WatcherId
    where
        F: FnMut(WatchEvent, &Path) -> CallbackResult + 'static,
    {
        let state = PathState::new(path.into(), options, self.clock.now());
        let mut registry = self.registry.borrow_mut();
        let id = WatcherId::from_raw(registry.ids.next());
        registry.watchers.push((
            id,
            PathWatcher {
                state,
                callback: Rc::new(RefCell::new(Box::new(callback))),
            },
        ));
        id
    }

    /// Stops watching. Returns false for unknown ids.
    pub fn remove_watcher(&self, id: WatcherId) -> bool {
        let removed = {
            let mut registry = self.registry.borrow_mut();
            let position = registry.watchers.iter().position(|(watcher, _)| *watcher == id);
            position.map(|position| registry.watchers.remove(position))
        };
        removed.is_some()
    }

    /// Operations queued or streaming.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.registry.borrow().operations.len()
    }

    /// Registered path watchers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.registry.borrow().watchers.len()
    }

    fn advance(operation: Operation) -> Step {
        let Operation {
            stage,
            options,
            callback,
        } = operation;
        match stage {
            Stage::Queued(op) if options.streaming && op.is_streamable() => {
                match Transfer::open(op, options) {
                    Ok(transfer) => Self::advance(Operation {
                        stage: Stage::Streaming(transfer),
                        options,
                        callback,
                    }),
                    Err(err) => Step::Finished(callback, Err(err)),
                }
            }
            Stage::Queued(op) => Step::Finished(callback, operation::execute(&op, options)),
            Stage::Streaming(mut transfer) => match transfer.step() {
                Ok(Some(output)) => Step::Finished(callback, Ok(output)),
                Ok(None) => Step::Continue(Operation {
                    stage: Stage::Streaming(transfer),
                    options,
                    callback,
                }),
                Err(err) => Step::Finished(callback, Err(err)),
            },
        }
    }

    fn process_operations(&self, first_error: &mut Option<Error>) -> bool {
        let snapshot: Vec<OperationId> = self.registry.borrow().order.iter().copied().collect();
        let mut worked = false;
        for id in snapshot {
            let Some(operation) = self.registry.borrow_mut().operations.remove(&id) else {
                continue;
            };
            worked = true;
            match Self::advance(operation) {
                Step::Continue(operation) => {
                    self.registry.borrow_mut().operations.insert(id, operation);
                }
                Step::Finished(callback, outcome) => {
                    self.registry.borrow_mut().order.retain(|queued| *queued != id);
                    trace!(op = %id, ok = outcome.is_ok(), "file operation finished");
                    if let Err(source) = callback(outcome) {
                        first_error.get_or_insert_with(|| Error::source_callback("file", source));
                    }
                }
            }
        }
        worked
    }

    fn process_watchers(&self, first_error: &mut Option<Error>) -> bool {
        let now = self.clock.now();
        let fired: Vec<_> = {
            let mut registry = self.registry.borrow_mut();
            registry
                .watchers
                .iter_mut()
                .filter_map(|(id, watcher)| {
                    let event = watcher.state.check(now)?;
                    Some((
                        *id,
                        event,
                        watcher.state.path().to_path_buf(),
                        Rc::clone(&watcher.callback),
                    ))
                })
                .collect()
        };
        let worked = !fired.is_empty();
        for (id, event, path, callback) in fired {
            let live = self
                .registry
                .borrow()
                .watchers
                .iter()
                .any(|(watcher, _)| *watcher == id);
            if !live {
                continue;
            }
            let Ok(mut callback) = callback.try_borrow_mut() else {
                continue;
            };
            if let Err(source) = callback(event, &path) {
                first_error.get_or_insert_with(|| Error::source_callback("file", source));
            }
        }
        worked
    }
}

impl WorkSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn has_work(&self) -> bool {
        let registry = self.registry.borrow();
        !registry.operations.is_empty() || !registry.watchers.is_empty()
    }

    fn has_ready_work(&self) -> bool {
        !self.registry.borrow().operations.is_empty()
    }

    /// Advances every operation queued before this poll, then checks the
    /// watchers whose interval elapsed. A failing callback does not stop
    /// the rest; the first failure is returned afterwards.
    fn poll(&self) -> Result<bool> {
        let mut first_error = None;
        let ops = self.process_operations(&mut first_error);
        let watched = self.process_watchers(&mut first_error);
        first_error.map_or(Ok(ops || watched), Err)
    }

    fn clear(&self) {
        let (operations, watchers) = {
            let mut registry = self.registry.borrow_mut();
            registry.order.clear();
            (
                std::mem::take(&mut registry.operations),
                std::mem::take(&mut registry.watchers),
            )
        };
        drop(operations);
        drop(watchers);
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.borrow();
        f.debug_struct("FileSource")
            .field("operations", &registry.operations.len())
            .field("watchers", &registry.watchers.len())
            .finish_non_exhaustive()
    }
}
