//! Thread-local default loop.
//!
//! Code that cannot thread a [`LoopHandle`] through can reach the calling
//! thread's default loop instead. The default loop is created on first use
//! with the default configuration and carries lazily registered standard
//! work sources (signals, files, HTTP and, on Unix, descriptor streams).
//!
//! ```no_run
//! use phaseloop::global;
//! use std::time::Duration;
//!
//! global::handle().add_timer(Duration::from_millis(10), || {
//!     println!("tick");
//!     Ok(())
//! });
//! global::run().expect("loop failed");
//! ```

use crate::error::Result;
use crate::fs::FileSource;
#[cfg(not(target_arch = "wasm32"))]
use crate::http::HttpSource;
#[cfg(unix)]
use crate::io::StreamSource;
use crate::runtime::{EventLoop, LoopHandle, SourcePhase};
use crate::signal::SignalSource;
use std::cell::{OnceCell, RefCell};
use std::rc::Rc;

thread_local! {
    static DEFAULT: RefCell<Option<Rc<DefaultLoop>>> = const { RefCell::new(None) };
}

/// An event loop bundled with its standard work sources.
///
/// Each source is created and registered the first time it is requested,
/// so a loop that never touches signals never installs a handler.
pub struct DefaultLoop {
    event_loop: EventLoop,
    signals: OnceCell<Rc<SignalSource>>,
    files: OnceCell<Rc<FileSource>>,
    #[cfg(not(target_arch = "wasm32"))]
    http: OnceCell<Rc<HttpSource>>,
    #[cfg(unix)]
    streams: OnceCell<Rc<StreamSource>>,
}

impl DefaultLoop {
    /// Wraps an existing loop.
    #[must_use]
    pub fn new(event_loop: EventLoop) -> Self {
        Self {
            event_loop,
            signals: OnceCell::new(),
            files: OnceCell::new(),
            #[cfg(not(target_arch = "wasm32"))]
            http: OnceCell::new(),
            #[cfg(unix)]
            streams: OnceCell::new(),
        }
    }

    /// The wrapped loop.
    #[must_use]
    pub const fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    /// The signal source, registered in the signal phase.
    pub fn signals(&self) -> Rc<SignalSource> {
        Rc::clone(self.signals.get_or_init(|| {
            let source = Rc::new(SignalSource::new());
            self.event_loop.add_source(SourcePhase::Signal, Rc::clone(&source));
            source
        }))
    }

    /// The file source, registered in the I/O phase.
    pub fn files(&self) -> Rc<FileSource> {
        Rc::clone(self.files.get_or_init(|| {
            let source = Rc::new(FileSource::new(self.event_loop.clock()));
            self.event_loop.add_source(SourcePhase::Io, Rc::clone(&source));
            source
        }))
    }

    /// The HTTP source, registered in the I/O phase.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn http(&self) -> Rc<HttpSource> {
        Rc::clone(self.http.get_or_init(|| {
            let source = Rc::new(HttpSource::new(self.event_loop.clock()));
            self.event_loop.add_source(SourcePhase::Io, Rc::clone(&source));
            source
        }))
    }

    /// The descriptor stream source, registered in the I/O phase. Fails if
    /// the OS poller cannot be created.
    #[cfg(unix)]
    pub fn streams(&self) -> Result<Rc<StreamSource>> {
        if let Some(source) = self.streams.get() {
            return Ok(Rc::clone(source));
        }
        let source = Rc::new(StreamSource::from_config(self.event_loop.config())?);
        self.event_loop.add_source(SourcePhase::Io, Rc::clone(&source));
        let _ = self.streams.set(Rc::clone(&source));
        Ok(source)
    }
}

impl std::ops::Deref for DefaultLoop {
    type Target = EventLoop;

    fn deref(&self) -> &EventLoop {
        &self.event_loop
    }
}

impl std::fmt::Debug for DefaultLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultLoop")
            .field("event_loop", &self.event_loop)
            .field("signals", &self.signals.get().is_some())
            .field("files", &self.files.get().is_some())
            .finish_non_exhaustive()
    }
}

/// The calling thread's default loop, created on first use.
#[must_use]
pub fn default_loop() -> Rc<DefaultLoop> {
    DEFAULT.with(|slot| {
        Rc::clone(
            slot.borrow_mut()
                .get_or_insert_with(|| Rc::new(DefaultLoop::new(EventLoop::new()))),
        )
    })
}

/// Installs `event_loop` as the thread's default, replacing (and returning)
/// any previous one.
pub fn set_default(event_loop: EventLoop) -> Option<Rc<DefaultLoop>> {
    DEFAULT.with(|slot| slot.borrow_mut().replace(Rc::new(DefaultLoop::new(event_loop))))
}

/// A handle to the default loop.
#[must_use]
pub fn handle() -> LoopHandle {
    default_loop().handle()
}

/// Runs the default loop until it runs out of work or is stopped.
pub fn run() -> Result<()> {
    default_loop().run()
}

/// Runs one cycle of the default loop.
pub fn run_once() -> Result<bool> {
    default_loop().run_once()
}

/// Drops the default loop, discarding its pending work. The next access
/// creates a fresh one. Returns false if there was none.
pub fn reset_default() -> bool {
    let previous = DEFAULT.with(|slot| slot.borrow_mut().take());
    previous.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::WorkSource;
    use std::cell::Cell;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn default_loop_is_shared_until_reset() {
        init_test("default_loop_is_shared_until_reset");
        reset_default();
        let first = default_loop();
        let second = default_loop();
        assert!(Rc::ptr_eq(&first, &second));

        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        handle().schedule_tick(move || {
            flag.set(true);
            Ok(())
        });
        run().unwrap();
        assert!(ran.get());

        drop((first, second));
        assert!(reset_default());
        assert!(!reset_default());
        crate::test_complete!("default_loop_is_shared_until_reset");
    }

    #[test]
    fn standard_sources_register_once() {
        init_test("standard_sources_register_once");
        let default = DefaultLoop::new(EventLoop::new());
        let files = default.files();
        assert!(Rc::ptr_eq(&files, &default.files()));
        assert!(!files.has_work());
        assert!(!default.has_work(), "idle sources keep nothing alive");
        crate::test_complete!("standard_sources_register_once");
    }

    #[test]
    fn reset_discards_pending_work() {
        init_test("reset_discards_pending_work");
        set_default(EventLoop::new());
        handle().schedule_deferred(|| Ok(()));
        assert!(default_loop().has_work());
        reset_default();
        assert!(!default_loop().has_work());
        reset_default();
        crate::test_complete!("reset_discards_pending_work");
    }
}
