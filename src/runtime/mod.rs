//! The loop runtime.
//!
//! - [`queue`]: prioritized callback lanes and their drain rules
//! - [`timer`]: timer wheel with tombstone cancellation
//! - [`scheduler`]: cooperative task scheduler with explicit wakes
//! - [`phase`]: the fixed seven-phase cycle
//! - [`state`]: running / graceful stopping / force stopped
//! - [`idle`]: idle sleep sizing
//! - [`activity`]: activity tracking for idleness detection
//! - [`source`]: the [`WorkSource`] contract for external producers
//! - [`event_loop`]: [`EventLoop`], [`LoopHandle`] and the builder

pub mod activity;
pub mod event_loop;
pub mod idle;
pub mod phase;
pub mod queue;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod stored_task;
pub mod timer;
pub mod yield_now;

pub use activity::{ActivityStats, ActivityTracker};
pub use event_loop::{EventLoop, EventLoopBuilder, LoopHandle};
pub use idle::IdleSleepController;
pub use phase::{Phase, PhaseOrchestrator};
pub use queue::{DrainReport, Lane, TaskQueue};
pub use scheduler::{TaskScheduler, TaskState, TaskStats};
pub use source::{SourcePhase, WorkSource};
pub use state::{RunState, RunStateMachine};
pub use timer::{TimerInfo, TimerKind, TimerStats, TimerWheel};
pub use yield_now::yield_now;
