//! Pluggable work sources.
//!
//! A work source is anything outside the loop that produces callbacks: OS
//! signals, descriptor readiness, file operations, network transfers. The
//! loop polls registered sources in the signal and I/O phases, in
//! registration order, and asks them whether they keep the loop alive.

use crate::error::Result;
use crate::types::{IdAllocator, SourceId};
use serde::Serialize;
use std::rc::Rc;

/// Phase a source is polled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SourcePhase {
    /// First phase of the cycle.
    Signal,
    /// After tasks, before the check phase.
    Io,
}

/// A producer of work polled by the loop.
///
/// Sources are shared through `Rc` and use interior mutability, so every
/// method takes `&self`. Implementations must not hold a borrow of their own
/// state while running a user callback: callbacks are allowed to call back
/// into the source that runs them.
pub trait WorkSource {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// True while the source has outstanding interest (listeners, watchers,
    /// queued or in-flight operations). Keeps the loop running and holds
    /// back the deferred lane.
    fn has_work(&self) -> bool;

    /// True if work is runnable right now, without waiting on the OS. Stops
    /// the loop from idling.
    fn has_ready_work(&self) -> bool {
        false
    }

    /// Performs one non-blocking (or briefly bounded) round of work and runs
    /// the resulting callbacks. Returns true if anything happened.
    fn poll(&self) -> Result<bool>;

    /// Drops all outstanding interest without running callbacks.
    fn clear(&self);
}

struct Registration {
    id: SourceId,
    phase: SourcePhase,
    source: Rc<dyn WorkSource>,
}

/// Registered sources in registration order.
#[derive(Default)]
pub(crate) struct SourceRegistry {
    ids: IdAllocator,
    entries: Vec<Registration>,
}

impl SourceRegistry {
    pub(crate) fn add(&mut self, phase: SourcePhase, source: Rc<dyn WorkSource>) -> SourceId {
        let id = SourceId::from_raw(self.ids.next());
        self.entries.push(Registration { id, phase, source });
        id
    }

    pub(crate) fn remove(&mut self, id: SourceId) -> Option<Rc<dyn WorkSource>> {
        let position = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(position).source)
    }

    /// Sources of `phase`, cloned so the registry borrow can be released
    /// before polling.
    pub(crate) fn snapshot(&self, phase: SourcePhase) -> Vec<Rc<dyn WorkSource>> {
        self.entries
            .iter()
            .filter(|entry| entry.phase == phase)
            .map(|entry| Rc::clone(&entry.source))
            .collect()
    }

    pub(crate) fn all(&self) -> Vec<Rc<dyn WorkSource>> {
        self.entries.iter().map(|entry| Rc::clone(&entry.source)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn take_all(&mut self) -> Vec<Rc<dyn WorkSource>> {
        self.entries.drain(..).map(|entry| entry.source).collect()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .iter()
                    .map(|entry| (entry.id, entry.phase, entry.source.name())),
            )
            .finish()
    }
}
