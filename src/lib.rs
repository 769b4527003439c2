//! Phaseloop: a single-threaded cooperative event loop.
//!
//! # Overview
//!
//! One thread, one loop, one fixed cycle. Work enters the loop as plain
//! callbacks on four priority lanes, as one-shot and periodic timers, as
//! cooperative tasks (`Future`s that are only re-polled after an explicit
//! wake), or through pluggable work sources polled at fixed points of the
//! cycle. Every cycle runs seven phases in the same order:
//!
//! 1. signal sources
//! 2. ticks and microtasks
//! 3. due timers
//! 4. ready tasks
//! 5. I/O sources
//! 6. immediates
//! 7. deferred callbacks, only when no other callback, timer, task or source
//!    work is outstanding
//!
//! Ticks and microtasks are drained again after every timer, after the task
//! phase, after productive I/O and after every immediate batch, so they
//! always run before the next lower-priority item.
//!
//! # Example
//!
//! ```
//! use phaseloop::EventLoop;
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new();
//! let handle = event_loop.handle();
//! event_loop.schedule_deferred(|| Ok(()));
//! event_loop.add_timer(Duration::from_millis(1), move || {
//!     handle.schedule_tick(|| Ok(()));
//!     Ok(())
//! });
//! event_loop.run().expect("loop failed");
//! assert!(!event_loop.has_work());
//! ```
//!
//! # Module Structure
//!
//! - [`types`]: identifiers and the loop's monotonic [`Time`]
//! - [`time`]: clocks (wall and virtual) and the task-level [`Sleep`](time::Sleep)
//! - [`runtime`]: lanes, timers, tasks, phases, run state and the loop itself
//! - [`signal`]: OS signal listeners
//! - [`io`]: descriptor readiness watchers (Unix)
//! - [`fs`]: filesystem operations and path watchers
//! - [`http`]: outbound HTTP/1.1 transfers
//! - [`config`]: [`LoopConfig`] and its validation
//! - [`error`](mod@error): the crate [`Error`]
//! - [`global`]: the thread-local default loop
//! - [`tracing_compat`]: logging macros that vanish without `tracing-integration`

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]

pub mod config;
pub mod error;
pub mod fs;
pub mod global;
#[cfg(not(target_arch = "wasm32"))]
pub mod http;
#[cfg(unix)]
pub mod io;
pub mod runtime;
pub mod signal;
pub mod time;
pub mod tracing_compat;
pub mod types;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use config::LoopConfig;
pub use error::{BoxError, CallbackResult, Error, Result};
pub use runtime::{
    EventLoop, EventLoopBuilder, Lane, LoopHandle, RunState, SourcePhase, TaskState, WorkSource,
    yield_now,
};
pub use time::{TimeSource, VirtualClock, WallClock};
pub use types::{TaskId, Time, TimerId};
