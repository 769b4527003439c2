//! Signal listeners dispatched from the signal phase.

use crate::error::{CallbackResult, Error, Result};
use crate::runtime::source::WorkSource;
use crate::signal::SignalKind;
use crate::tracing_compat::{debug, trace};
use crate::types::{IdAllocator, ListenerId};
use hashbrown::HashMap;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type ListenerFn = Rc<RefCell<Box<dyn FnMut(SignalKind) -> CallbackResult>>>;

struct Listener {
    id: ListenerId,
    kind: SignalKind,
    callback: ListenerFn,
}

/// OS-side registration for one signal, shared by all its listeners.
struct Installed {
    pending: Arc<AtomicBool>,
    #[cfg(unix)]
    handler: signal_hook::SigId,
}

impl Installed {
    #[cfg(unix)]
    fn install(kind: SignalKind) -> Result<Self> {
        let raw = kind.as_raw_value().ok_or(Error::Unsupported {
            capability: "signal handling",
        })?;
        let pending = Arc::new(AtomicBool::new(false));
        let handler = signal_hook::flag::register(raw, Arc::clone(&pending))?;
        debug!(signal = kind.name(), "signal handler installed");
        Ok(Self { pending, handler })
    }

    #[cfg(not(unix))]
    fn install(_kind: SignalKind) -> Result<Self> {
        Err(Error::Unsupported {
            capability: "signal handling",
        })
    }

    fn uninstall(self, kind: SignalKind) {
        #[cfg(unix)]
        signal_hook::low_level::unregister(self.handler);
        debug!(signal = kind.name(), "signal handler removed");
    }
}

#[derive(Default)]
struct Registry {
    ids: IdAllocator,
    listeners: Vec<Listener>,
    installed: HashMap<SignalKind, Installed>,
}

impl Registry {
    fn contains(&self, id: ListenerId) -> bool {
        self.listeners.iter().any(|listener| listener.id == id)
    }

    fn callbacks_for(&self, kind: SignalKind) -> Vec<(ListenerId, ListenerFn)> {
        self.listeners
            .iter()
            .filter(|listener| listener.kind == kind)
            .map(|listener| (listener.id, Rc::clone(&listener.callback)))
            .collect()
    }

    fn take_pending(&self) -> Vec<SignalKind> {
        let mut kinds: Vec<SignalKind> = self
            .installed
            .iter()
            .filter(|(_, installed)| installed.pending.swap(false, Ordering::AcqRel))
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Work source that turns OS signals into listener callbacks.
///
/// The OS handler only raises a flag; listeners run on the loop thread
/// during the signal phase. The first listener for a signal installs the
/// handler and removing the last one uninstalls it. Once uninstalled, the
/// signal is ignored rather than restored to its default action.
///
/// Register it with the loop in the signal phase:
///
/// ```no_run
/// use phaseloop::runtime::{EventLoop, SourcePhase};
/// use phaseloop::signal::{SignalKind, SignalSource};
/// use std::rc::Rc;
///
/// let event_loop = EventLoop::new();
/// let signals = Rc::new(SignalSource::new());
/// event_loop.add_source(SourcePhase::Signal, Rc::clone(&signals));
///
/// let handle = event_loop.handle();
/// signals
///     .add_listener(SignalKind::Interrupt, move |_| {
///         handle.stop();
///         Ok(())
///     })
///     .expect("signals supported");
/// event_loop.run().expect("loop failed");
/// ```
#[derive(Default)]
pub struct SignalSource {
    registry: RefCell<Registry>,
}

impl SignalSource {
    /// Creates a source with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener for `kind`.
    ///
    /// Fails with [`Error::Unsupported`] on platforms without signals, and
    /// with [`Error::Io`] if the OS refuses the handler.
    pub fn add_listener<F>(&self, kind: SignalKind, callback: F) -> Result<ListenerId>
    where
        F: FnMut(SignalKind) -> CallbackResult + 'static,
    {
        let mut registry = self.registry.borrow_mut();
        if !registry.installed.contains_key(&kind) {
            let installed = Installed::install(kind)?;
            registry.installed.insert(kind, installed);
        }
        let id = ListenerId::from_raw(registry.ids.next());
        registry.listeners.push(Listener {
            id,
            kind,
            callback: Rc::new(RefCell::new(Box::new(callback))),
        });
        Ok(id)
    }

    /// Removes a listener. Returns false for unknown ids.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let (removed, uninstalled) = {
            let mut registry = self.registry.borrow_mut();
            let Some(position) = registry.listeners.iter().position(|l| l.id == id) else {
                return false;
            };
            let removed = registry.listeners.remove(position);
            let kind = removed.kind;
            let uninstalled = if registry.listeners.iter().any(|l| l.kind == kind) {
                None
            } else {
                registry.installed.remove(&kind).map(|installed| (kind, installed))
            };
            (removed, uninstalled)
        };
        if let Some((kind, installed)) = uninstalled {
            installed.uninstall(kind);
        }
        drop(removed);
        true
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: SignalKind) -> usize {
        self.registry
            .borrow()
            .listeners
            .iter()
            .filter(|listener| listener.kind == kind)
            .count()
    }

    /// True if any listener is registered.
    #[must_use]
    pub fn has_listeners(&self) -> bool {
        !self.registry.borrow().listeners.is_empty()
    }

    fn dispatch(&self, kind: SignalKind, first_error: &mut Option<Error>) {
        let callbacks = self.registry.borrow().callbacks_for(kind);
        for (id, callback) in callbacks {
            if !self.registry.borrow().contains(id) {
                continue;
            }
            let Ok(mut callback) = callback.try_borrow_mut() else {
                continue;
            };
            if let Err(source) = callback(kind) {
                trace!(signal = kind.name(), listener = %id, "signal listener failed");
                first_error.get_or_insert_with(|| Error::source_callback("signal", source));
            }
        }
    }
}

impl WorkSource for SignalSource {
    fn name(&self) -> &'static str {
        "signal"
    }

    fn has_work(&self) -> bool {
        self.has_listeners()
    }

    fn has_ready_work(&self) -> bool {
        self.registry
            .borrow()
            .installed
            .values()
            .any(|installed| installed.pending.load(Ordering::Acquire))
    }

    /// Runs every listener of every signal received since the last poll.
    /// A failing listener does not stop the others; the first failure is
    /// returned once all have run.
    fn poll(&self) -> Result<bool> {
        let pending = self.registry.borrow().take_pending();
        if pending.is_empty() {
            return Ok(false);
        }
        let mut first_error = None;
        for kind in pending {
            trace!(signal = kind.name(), "dispatching signal");
            self.dispatch(kind, &mut first_error);
        }
        first_error.map_or(Ok(true), Err)
    }

    fn clear(&self) {
        let (listeners, installed) = {
            let mut registry = self.registry.borrow_mut();
            (
                std::mem::take(&mut registry.listeners),
                std::mem::take(&mut registry.installed),
            )
        };
        for (kind, installed) in installed {
            installed.uninstall(kind);
        }
        drop(listeners);
    }
}

impl Drop for SignalSource {
    fn drop(&mut self) {
        let installed = std::mem::take(&mut self.registry.get_mut().installed);
        for (kind, installed) in installed {
            installed.uninstall(kind);
        }
    }
}

impl std::fmt::Debug for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.borrow();
        let mut installed: Vec<_> = registry.installed.keys().copied().collect();
        installed.sort_unstable();
        f.debug_struct("SignalSource")
            .field("listeners", &registry.listeners.len())
            .field("installed", &installed)
            .finish()
    }
}
