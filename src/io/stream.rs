//! Descriptor readiness watchers.

use crate::config::LoopConfig;
use crate::error::{CallbackResult, Error, Result};
use crate::runtime::source::WorkSource;
use crate::tracing_compat::{debug, trace};
use crate::types::{IdAllocator, WatcherId};
use hashbrown::HashMap;
use polling::{Event, Events, Poller};
use slab::Slab;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::rc::Rc;
use std::time::Duration;

enum WatcherCallback {
    Read(Rc<RefCell<Box<dyn FnMut() -> CallbackResult>>>),
    Write(Box<dyn FnOnce() -> CallbackResult>),
}

struct Watcher {
    key: usize,
    callback: WatcherCallback,
}

/// One poller registration, shared by every watcher on the descriptor.
struct Registration {
    owner: Rc<dyn AsFd>,
    raw: RawFd,
    serial: u64,
    readers: SmallVec<[WatcherId; 2]>,
    writers: SmallVec<[WatcherId; 2]>,
}

impl Registration {
    fn interest(&self, key: usize) -> Event {
        let mut event = Event::none(key);
        event.readable = !self.readers.is_empty();
        event.writable = !self.writers.is_empty();
        event
    }

    fn is_empty(&self) -> bool {
        self.readers.is_empty() && self.writers.is_empty()
    }
}

#[derive(Default)]
struct Registry {
    ids: IdAllocator,
    serials: IdAllocator,
    fds: Slab<Registration>,
    by_raw: HashMap<RawFd, usize>,
    watchers: HashMap<WatcherId, Watcher>,
}

struct Ready {
    key: usize,
    serial: u64,
    readable: bool,
    writable: bool,
}

/// Work source that runs callbacks when descriptors become readable or
/// writable.
///
/// Each poll re-arms the interest of every watched descriptor and waits at
/// most the configured timeout (1 ms by default). Read watchers persist
/// until removed; write watchers fire once. The source keeps the watched
/// object alive through the `Rc` it was given, and deregisters the
/// descriptor before releasing it.
pub struct StreamSource {
    poller: Poller,
    events: RefCell<Events>,
    registry: RefCell<Registry>,
    timeout: Duration,
}

impl StreamSource {
    /// Creates a source with the default 1 ms readiness wait.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_millis(1))
    }

    /// Creates a source using the loop's configured readiness wait.
    pub fn from_config(config: &LoopConfig) -> Result<Self> {
        Self::with_timeout(config.stream_poll_timeout)
    }

    /// Creates a source that waits at most `timeout` per poll.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            events: RefCell::new(Events::new()),
            registry: RefCell::new(Registry::default()),
            timeout,
        })
    }

    /// Runs `callback` every time `stream` is readable.
    pub fn add_read_watcher<S, F>(&self, stream: Rc<S>, callback: F) -> Result<WatcherId>
    where
        S: AsFd + 'static,
        F: FnMut() -> CallbackResult + 'static,
    {
        self.add_watcher(
            stream,
            WatcherCallback::Read(Rc::new(RefCell::new(Box::new(callback)))),
        )
    }

    /// Runs `callback` once, the next time `stream` is writable.
    pub fn add_write_watcher<S, F>(&self, stream: Rc<S>, callback: F) -> Result<WatcherId>
    where
        S: AsFd + 'static,
        F: FnOnce() -> CallbackResult + 'static,
    {
        self.add_watcher(stream, WatcherCallback::Write(Box::new(callback)))
    }

    fn add_watcher<S>(&self, stream: Rc<S>, callback: WatcherCallback) -> Result<WatcherId>
    where
        S: AsFd + 'static,
    {
        let raw = stream.as_fd().as_raw_fd();
        let mut registry = self.registry.borrow_mut();
        let key = match registry.by_raw.get(&raw) {
            Some(&key) => key,
            None => {
                let serial = registry.serials.next();
                let key = registry.fds.insert(Registration {
                    owner: stream,
                    raw,
                    serial,
                    readers: SmallVec::new(),
                    writers: SmallVec::new(),
                });
                // SAFETY: the registration owns an `Rc` of the descriptor's
                // owner and deletes the descriptor from the poller before
                // releasing it, so the descriptor outlives its registration.
                #[allow(unsafe_code)]
                let added = unsafe { self.poller.add(raw, Event::none(key)) };
                if let Err(err) = added {
                    registry.fds.remove(key);
                    return Err(err.into());
                }
                registry.by_raw.insert(raw, key);
                debug!(fd = raw, "descriptor registered");
                key
            }
        };
        let id = WatcherId::from_raw(registry.ids.next());
        let entry = &mut registry.fds[key];
        match &callback {
            WatcherCallback::Read(_) => entry.readers.push(id),
            WatcherCallback::Write(_) => entry.writers.push(id),
        }
        registry.watchers.insert(id, Watcher { key, callback });
        Ok(id)
    }

    /// Removes a watcher. Returns false for unknown ids, including write
    /// watchers that already fired.
    pub fn remove_watcher(&self, id: WatcherId) -> bool {
        let (watcher, released) = {
            let mut registry = self.registry.borrow_mut();
            let Some(watcher) = registry.watchers.remove(&id) else {
                return false;
            };
            let released = self.detach(&mut registry, watcher.key, id);
            (watcher, released)
        };
        drop(watcher);
        drop(released);
        true
    }

    /// Removes every read watcher on `stream`. Returns how many were removed.
    pub fn remove_read_watchers<S: AsFd + ?Sized>(&self, stream: &S) -> usize {
        self.remove_for(stream.as_fd().as_raw_fd(), true, false)
    }

    /// Removes every pending write watcher on `stream`. Returns how many were
    /// removed.
    pub fn remove_write_watchers<S: AsFd + ?Sized>(&self, stream: &S) -> usize {
        self.remove_for(stream.as_fd().as_raw_fd(), false, true)
    }

    /// Removes every watcher on `stream` and deregisters its descriptor.
    /// Returns how many watchers were removed.
    pub fn clear_watchers_for<S: AsFd + ?Sized>(&self, stream: &S) -> usize {
        self.remove_for(stream.as_fd().as_raw_fd(), true, true)
    }

    fn remove_for(&self, raw: RawFd, readers: bool, writers: bool) -> usize {
        let (removed, released) = {
            let mut registry = self.registry.borrow_mut();
            let Some(&key) = registry.by_raw.get(&raw) else {
                return 0;
            };
            let entry = &mut registry.fds[key];
            let mut ids: SmallVec<[WatcherId; 4]> = SmallVec::new();
            if readers {
                ids.extend(entry.readers.drain(..));
            }
            if writers {
                ids.extend(entry.writers.drain(..));
            }
            let removed: Vec<Watcher> = ids
                .iter()
                .filter_map(|id| registry.watchers.remove(id))
                .collect();
            let released = self.release_if_unwatched(&mut registry, key);
            (removed, released)
        };
        let count = removed.len();
        if count > 0 {
            debug!(fd = raw, count, "watchers removed for descriptor");
        }
        drop(removed);
        drop(released);
        count
    }

    /// Number of live watchers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.registry.borrow().watchers.len()
    }

    /// Number of descriptors registered with the poller.
    #[must_use]
    pub fn registered_fds(&self) -> usize {
        self.registry.borrow().fds.len()
    }

    /// Unlinks `id` from its registration and deregisters the descriptor if
    /// nothing else watches it. Returns the released owner so the caller can
    /// drop it after the borrow ends.
    fn detach(&self, registry: &mut Registry, key: usize, id: WatcherId) -> Option<Rc<dyn AsFd>> {
        let entry = registry.fds.get_mut(key)?;
        entry.readers.retain(|watcher| *watcher != id);
        entry.writers.retain(|watcher| *watcher != id);
        self.release_if_unwatched(registry, key)
    }

    fn release_if_unwatched(&self, registry: &mut Registry, key: usize) -> Option<Rc<dyn AsFd>> {
        if !registry.fds.get(key)?.is_empty() {
            return None;
        }
        let entry = registry.fds.remove(key);
        registry.by_raw.remove(&entry.raw);
        if let Err(err) = self.poller.delete(entry.owner.as_fd()) {
            debug!(fd = entry.raw, error = %err, "descriptor deregistration failed");
        }
        Some(entry.owner)
    }

    fn wait_ready(&self) -> Result<Vec<Ready>> {
        let registry = self.registry.borrow();
        for (key, entry) in &registry.fds {
            self.poller.modify(entry.owner.as_fd(), entry.interest(key))?;
        }
        let mut events = self.events.borrow_mut();
        events.clear();
        self.poller.wait(&mut events, Some(self.timeout))?;
        Ok(events
            .iter()
            .filter_map(|event| {
                let entry = registry.fds.get(event.key)?;
                Some(Ready {
                    key: event.key,
                    serial: entry.serial,
                    readable: event.readable,
                    writable: event.writable,
                })
            })
            .collect())
    }

    fn dispatch(&self, ready: &Ready, first_error: &mut Option<Error>) -> bool {
        let (readers, writers) = {
            let mut registry = self.registry.borrow_mut();
            match registry.fds.get(ready.key) {
                Some(entry) if entry.serial == ready.serial => {}
                _ => return false,
            }
            let readers: SmallVec<[_; 2]> = if ready.readable {
                registry.fds[ready.key]
                    .readers
                    .iter()
                    .filter_map(|id| match &registry.watchers.get(id)?.callback {
                        WatcherCallback::Read(callback) => Some((*id, Rc::clone(callback))),
                        WatcherCallback::Write(_) => None,
                    })
                    .collect()
            } else {
                SmallVec::new()
            };
            let mut writers = Vec::new();
            let mut released = None;
            if ready.writable {
                let ids = std::mem::take(&mut registry.fds[ready.key].writers);
                for id in ids {
                    if let Some(watcher) = registry.watchers.remove(&id) {
                        if let WatcherCallback::Write(callback) = watcher.callback {
                            writers.push(callback);
                        }
                    }
                }
                released = self.release_if_unwatched(&mut registry, ready.key);
            }
            drop(registry);
            drop(released);
            (readers, writers)
        };

        let mut ran = false;
        for (id, callback) in readers {
            if !self.registry.borrow().watchers.contains_key(&id) {
                continue;
            }
            let Ok(mut callback) = callback.try_borrow_mut() else {
                continue;
            };
            ran = true;
            if let Err(source) = callback() {
                first_error.get_or_insert_with(|| Error::source_callback("stream", source));
            }
        }
        for callback in writers {
            ran = true;
            if let Err(source) = callback() {
                first_error.get_or_insert_with(|| Error::source_callback("stream", source));
            }
        }
        ran
    }
}

impl WorkSource for StreamSource {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn has_work(&self) -> bool {
        !self.registry.borrow().watchers.is_empty()
    }

    fn poll(&self) -> Result<bool> {
        if !self.has_work() {
            return Ok(false);
        }
        let ready = self.wait_ready()?;
        let mut first_error = None;
        let mut worked = false;
        for entry in &ready {
            worked |= self.dispatch(entry, &mut first_error);
        }
        if worked {
            trace!(ready = ready.len(), "stream watchers ran");
        }
        first_error.map_or(Ok(worked), Err)
    }

    fn clear(&self) {
        let (watchers, owners) = {
            let mut registry = self.registry.borrow_mut();
            let watchers = std::mem::take(&mut registry.watchers);
            registry.by_raw.clear();
            let owners: Vec<_> = registry
                .fds
                .drain()
                .map(|entry| {
                    let _ = self.poller.delete(entry.owner.as_fd());
                    entry.owner
                })
                .collect();
            (watchers, owners)
        };
        drop(watchers);
        drop(owners);
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        let registry = self.registry.get_mut();
        for entry in registry.fds.drain() {
            let _ = self.poller.delete(entry.owner.as_fd());
        }
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.borrow();
        f.debug_struct("StreamSource")
            .field("watchers", &registry.watchers.len())
            .field("fds", &registry.fds.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
