//! The event loop and its handle.
//!
//! [`EventLoop`] owns a loop and drives it with [`EventLoop::run`] or
//! [`EventLoop::run_once`]. [`LoopHandle`] is a cheap clone that callbacks
//! and tasks capture to schedule more work, cancel timers, wake tasks or
//! stop the loop. `EventLoop` derefs to its handle, so the scheduling API is
//! available on both.
//!
//! ```
//! use phaseloop::runtime::EventLoop;
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new();
//! let handle = event_loop.handle();
//! event_loop.add_timer(Duration::ZERO, move || {
//!     handle.schedule_microtask(|| Ok(()));
//!     Ok(())
//! });
//! event_loop.run().unwrap();
//! assert!(!event_loop.has_work());
//! ```

use crate::config::LoopConfig;
use crate::error::{CallbackResult, Error, Result};
use crate::runtime::activity::{ActivityStats, ActivityTracker};
use crate::runtime::idle::IdleSleepController;
use crate::runtime::phase::PhaseOrchestrator;
use crate::runtime::queue::{Lane, TaskQueue};
use crate::runtime::scheduler::{TaskScheduler, TaskState, TaskStats};
use crate::runtime::source::{SourcePhase, SourceRegistry, WorkSource};
use crate::runtime::state::{RunState, RunStateMachine};
use crate::runtime::timer::{TimerInfo, TimerStats, TimerWheel};
use crate::time::{Sleep, TimeSource, WallClock};
use crate::tracing_compat::{debug, info, trace, warn};
use crate::types::{SourceId, TaskId, Time, TimerId};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// The iteration counter wraps back to zero at this value.
pub const ITERATION_WRAP: u64 = 1_000_000;

/// Shared state of one loop.
pub(crate) struct LoopCore {
    pub(crate) config: LoopConfig,
    pub(crate) clock: Arc<dyn TimeSource>,
    pub(crate) queue: RefCell<TaskQueue>,
    pub(crate) timers: RefCell<TimerWheel>,
    pub(crate) tasks: RefCell<TaskScheduler>,
    pub(crate) sources: RefCell<SourceRegistry>,
    pub(crate) state: RefCell<RunStateMachine>,
    pub(crate) activity: RefCell<ActivityTracker>,
    pub(crate) idle: IdleSleepController,
    in_cycle: Cell<bool>,
    iterations: Cell<u64>,
}

impl LoopCore {
    fn new(config: LoopConfig, clock: Arc<dyn TimeSource>) -> Self {
        let now = clock.now();
        Self {
            queue: RefCell::new(TaskQueue::new(config.microtask_cap)),
            timers: RefCell::new(TimerWheel::new(config.tombstone_rebuild_min)),
            tasks: RefCell::new(TaskScheduler::new()),
            sources: RefCell::new(SourceRegistry::default()),
            state: RefCell::new(RunStateMachine::new(config.graceful_shutdown_timeout)),
            activity: RefCell::new(ActivityTracker::new(now, config.idle_threshold)),
            idle: IdleSleepController::from_config(&config),
            in_cycle: Cell::new(false),
            iterations: Cell::new(0),
            clock,
            config,
        }
    }

    fn sources(&self) -> Vec<Rc<dyn WorkSource>> {
        self.sources.borrow().all()
    }

    /// True while anything could still produce a callback.
    pub(crate) fn has_work(&self) -> bool {
        self.queue.borrow().has_pending()
            || !self.timers.borrow().is_empty()
            || self.tasks.borrow().has_active_tasks()
            || self.sources().iter().any(|source| source.has_work())
    }

    /// True if anything besides the deferred lane is outstanding: a queued
    /// callback in another lane, a live timer, an active task, or a source
    /// with work. Deferred callbacks only run while this is false.
    pub(crate) fn has_work_besides_deferred(&self) -> bool {
        self.queue.borrow().has_non_deferred()
            || !self.timers.borrow().is_empty()
            || self.tasks.borrow().has_active_tasks()
            || self.sources().iter().any(|source| source.has_work())
    }

    /// True if work is runnable without waiting: non-deferred callbacks, due
    /// timers, ready tasks, or a source with ready work.
    pub(crate) fn has_immediate_work(&self) -> bool {
        let now = self.clock.now();
        self.queue.borrow().has_non_deferred()
            || self.timers.borrow_mut().has_ready_timers(now)
            || self.tasks.borrow().has_ready_tasks()
            || self.sources().iter().any(|source| source.has_ready_work())
    }

    fn idle_sleep_duration(&self) -> Duration {
        let immediate = self.has_immediate_work();
        let now = self.clock.now();
        let next_timer = self.timers.borrow_mut().next_timer_delay(now);
        self.idle.next_sleep_duration(immediate, next_timer)
    }

    fn next_iteration(&self) -> u64 {
        let next = self.iterations.get() + 1;
        let next = if next >= ITERATION_WRAP { 0 } else { next };
        self.iterations.set(next);
        next
    }

    fn stop(&self) {
        let now = self.clock.now();
        self.state.borrow_mut().stop(now);
    }

    fn force_stop(&self) {
        self.state.borrow_mut().force_stop();
        self.clear_all();
    }

    /// Discards every callback, timer and task and clears every source.
    /// Everything removed is dropped after the borrows are released.
    fn clear_all(&self) {
        let callbacks = self.queue.borrow_mut().take_all();
        let timers = self.timers.borrow_mut().take_all();
        let tasks = self.tasks.borrow_mut().take_all();
        let sources = self.sources();
        for source in &sources {
            source.clear();
        }
        if !callbacks.is_empty() || !timers.is_empty() || !tasks.is_empty() {
            warn!(
                callbacks = callbacks.len(),
                timers = timers.len(),
                tasks = tasks.len(),
                "discarded pending work"
            );
        }
        drop((callbacks, timers, tasks));
    }
}

/// Marks a cycle in progress; rejects nested `run`/`run_once`.
struct CycleGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> CycleGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Result<Self> {
        if flag.replace(true) {
            return Err(Error::Reentrant);
        }
        Ok(Self { flag })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// Cloneable handle to a loop.
///
/// Handles are not `Send`; the loop is single-threaded. Task wakers are the
/// only way to reach a loop from another thread.
#[derive(Clone)]
pub struct LoopHandle {
    core: Rc<LoopCore>,
}

impl LoopHandle {
    /// Adds a one-shot timer that runs `callback` once `delay` has elapsed.
    pub fn add_timer<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() -> CallbackResult + 'static,
    {
        let now = self.core.clock.now();
        self.core
            .timers
            .borrow_mut()
            .add_timer(now, delay, Box::new(callback))
    }

    /// Adds a timer that runs `callback` every `interval`, at most
    /// `max_executions` times if given.
    ///
    /// The next deadline is the previous deadline plus `interval`, so a loop
    /// that fell behind catches up one execution per cycle.
    pub fn add_periodic_timer<F>(
        &self,
        interval: Duration,
        callback: F,
        max_executions: Option<u64>,
    ) -> TimerId
    where
        F: FnMut() -> CallbackResult + 'static,
    {
        let now = self.core.clock.now();
        self.core.timers.borrow_mut().add_periodic_timer(
            now,
            interval,
            Box::new(callback),
            max_executions,
        )
    }

    /// Cancels a timer. Returns false if it already fired, was cancelled or
    /// never existed.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let removed = self.core.timers.borrow_mut().cancel(id);
        removed.is_some()
    }

    /// True if `id` is a live timer.
    #[must_use]
    pub fn has_timer(&self, id: TimerId) -> bool {
        self.core.timers.borrow().contains(id)
    }

    /// True if any timer is live.
    #[must_use]
    pub fn has_timers(&self) -> bool {
        !self.core.timers.borrow().is_empty()
    }

    /// Snapshot of a live timer.
    #[must_use]
    pub fn timer_info(&self, id: TimerId) -> Option<TimerInfo> {
        let now = self.core.clock.now();
        self.core.timers.borrow().info(id, now)
    }

    /// Timer counts.
    #[must_use]
    pub fn timer_stats(&self) -> TimerStats {
        self.core.timers.borrow().stats()
    }

    /// Time until the earliest live timer is due.
    #[must_use]
    pub fn next_timer_delay(&self) -> Option<Duration> {
        let now = self.core.clock.now();
        self.core.timers.borrow_mut().next_timer_delay(now)
    }

    /// Queues `callback` on `lane`.
    pub fn schedule<F>(&self, lane: Lane, callback: F)
    where
        F: FnOnce() -> CallbackResult + 'static,
    {
        self.core.queue.borrow_mut().push(lane, Box::new(callback));
    }

    /// Queues a tick callback: runs before microtasks, after the current
    /// phase.
    pub fn schedule_tick<F>(&self, callback: F)
    where
        F: FnOnce() -> CallbackResult + 'static,
    {
        self.schedule(Lane::Tick, callback);
    }

    /// Queues a microtask: runs once the tick lane is empty.
    pub fn schedule_microtask<F>(&self, callback: F)
    where
        F: FnOnce() -> CallbackResult + 'static,
    {
        self.schedule(Lane::Microtask, callback);
    }

    /// Queues an immediate callback for the check phase.
    pub fn schedule_immediate<F>(&self, callback: F)
    where
        F: FnOnce() -> CallbackResult + 'static,
    {
        self.schedule(Lane::Immediate, callback);
    }

    /// Queues a deferred callback for the close phase of a quiet cycle.
    pub fn schedule_deferred<F>(&self, callback: F)
    where
        F: FnOnce() -> CallbackResult + 'static,
    {
        self.schedule(Lane::Deferred, callback);
    }

    /// Callbacks queued on `lane`.
    #[must_use]
    pub fn queued(&self, lane: Lane) -> usize {
        self.core.queue.borrow().len(lane)
    }

    /// Adds a cooperative task, ready to start in the next task phase.
    ///
    /// Returns `None`, dropping the future, once a force stop began.
    pub fn add_task<F>(&self, task: F) -> Option<TaskId>
    where
        F: Future<Output = CallbackResult> + 'static,
    {
        self.core.tasks.borrow_mut().add_task(task)
    }

    /// Makes a suspended task ready. Returns true if it was suspended.
    pub fn wake(&self, id: TaskId) -> bool {
        self.core.tasks.borrow_mut().wake(id)
    }

    /// State of a task added to this loop; `None` for ids it never issued.
    #[must_use]
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.core.tasks.borrow().state(id)
    }

    /// True if any task has not finished.
    #[must_use]
    pub fn has_active_tasks(&self) -> bool {
        self.core.tasks.borrow().has_active_tasks()
    }

    /// Task counts.
    #[must_use]
    pub fn task_stats(&self) -> TaskStats {
        self.core.tasks.borrow().stats()
    }

    /// Future that completes after `duration`, for use inside tasks.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep::new(self.clone(), duration)
    }

    /// Registers a work source polled in `phase`.
    pub fn add_source<S>(&self, phase: SourcePhase, source: Rc<S>) -> SourceId
    where
        S: WorkSource + 'static,
    {
        let name = source.name();
        let id = self.core.sources.borrow_mut().add(phase, source);
        debug!(source = name, id = %id, "work source registered");
        id
    }

    /// Unregisters a work source without clearing it.
    pub fn remove_source(&self, id: SourceId) -> bool {
        let removed = self.core.sources.borrow_mut().remove(id);
        removed.is_some()
    }

    /// Requests a graceful stop: the loop leaves its main phase and gets a
    /// bounded window to finish remaining work.
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Stops immediately, discarding every pending callback, timer and task
    /// and clearing every work source. Later tasks are refused.
    pub fn force_stop(&self) {
        self.core.force_stop();
    }

    /// True while the loop is in the running state.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.core.state.borrow().is_running()
    }

    /// Current run state.
    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.core.state.borrow().state()
    }

    /// True if nothing is left to do, or nothing happened for longer than
    /// the idle threshold.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let now = self.core.clock.now();
        !self.core.has_work() || self.core.activity.borrow().is_idle(now)
    }

    /// True if anything could still produce a callback.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.core.has_work()
    }

    /// Current time of the loop's clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.core.clock.now()
    }

    /// The loop's time source.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn TimeSource> {
        Arc::clone(&self.core.clock)
    }

    /// The loop's configuration.
    #[must_use]
    pub fn config(&self) -> &LoopConfig {
        &self.core.config
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("state", &self.run_state())
            .finish_non_exhaustive()
    }
}

/// A single-threaded event loop.
pub struct EventLoop {
    handle: LoopHandle,
}

impl EventLoop {
    /// Creates a loop with the default configuration and a wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(LoopConfig::default(), Arc::new(WallClock::new()))
    }

    /// Starts building a loop with a custom configuration or clock.
    #[must_use]
    pub fn builder() -> EventLoopBuilder {
        EventLoopBuilder::new()
    }

    fn from_parts(config: LoopConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            handle: LoopHandle {
                core: Rc::new(LoopCore::new(config, clock)),
            },
        }
    }

    /// A new handle to this loop.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    fn core(&self) -> &LoopCore {
        &self.handle.core
    }

    /// Runs cycles while the loop is running and has work, sleeping between
    /// cycles that did nothing. After a stop, remaining work gets the
    /// graceful window before it is discarded.
    ///
    /// The first error raised by a callback, timer, task or source ends the
    /// run and is returned; the loop can be run again afterwards.
    pub fn run(&self) -> Result<()> {
        let core = self.core();
        let _guard = CycleGuard::enter(&core.in_cycle)?;
        info!("event loop started");
        while core.state.borrow().is_running() && core.has_work() {
            if !self.cycle()? {
                self.idle_pause();
            }
        }
        if !core.state.borrow().is_running() && core.has_work() {
            self.graceful_shutdown()?;
        }
        info!(state = ?core.state.borrow().state(), "event loop exited");
        Ok(())
    }

    /// Runs exactly one cycle, then sleeps like [`EventLoop::run`] would if
    /// the cycle did nothing. Returns whether the cycle did work.
    pub fn run_once(&self) -> Result<bool> {
        let core = self.core();
        let _guard = CycleGuard::enter(&core.in_cycle)?;
        let worked = self.cycle()?;
        if !worked {
            self.idle_pause();
        }
        Ok(worked)
    }

    fn cycle(&self) -> Result<bool> {
        let core = self.core();
        let iteration = core.next_iteration();
        let worked = PhaseOrchestrator::new(core).process_cycle()?;
        if worked {
            core.activity.borrow_mut().record(core.clock.now());
        }
        trace!(iteration, worked, "cycle complete");
        Ok(worked)
    }

    fn idle_pause(&self) {
        let core = self.core();
        let pause = core.idle_sleep_duration();
        if !pause.is_zero() {
            trace!(sleep_us = pause.as_micros() as u64, "idle sleep");
            core.clock.sleep(pause);
        }
    }

    fn graceful_shutdown(&self) -> Result<()> {
        let core = self.core();
        debug!(
            max_iterations = core.config.graceful_max_iterations,
            "graceful shutdown window opened"
        );
        for _ in 0..core.config.graceful_max_iterations {
            if !core.has_work() || core.state.borrow().should_force_shutdown(core.clock.now()) {
                break;
            }
            self.cycle()?;
            if !core.config.graceful_sleep.is_zero() {
                core.clock.sleep(core.config.graceful_sleep);
            }
        }
        if core.has_work() || core.state.borrow().should_force_shutdown(core.clock.now()) {
            warn!("graceful shutdown window exhausted, forcing stop");
            core.force_stop();
        }
        Ok(())
    }

    /// Re-arms a stopped loop so it can run again and accept tasks.
    pub fn restart(&self) {
        let core = self.core();
        core.state.borrow_mut().start();
        core.tasks.borrow_mut().resume_accepting();
        debug!("event loop restarted");
    }

    /// Cycles run so far, wrapping to zero at [`ITERATION_WRAP`].
    #[must_use]
    pub fn iteration_count(&self) -> u64 {
        self.core().iterations.get()
    }

    /// Activity statistics.
    #[must_use]
    pub fn activity_stats(&self) -> ActivityStats {
        self.core().activity.borrow().stats()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for EventLoop {
    type Target = LoopHandle;

    fn deref(&self) -> &LoopHandle {
        &self.handle
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let core = self.core();
        core.clear_all();
        let sources = core.sources.borrow_mut().take_all();
        drop(sources);
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core();
        f.debug_struct("EventLoop")
            .field("state", &core.state.borrow().state())
            .field("queue", &*core.queue.borrow())
            .field("timers", &core.timers.borrow().stats())
            .field("tasks", &core.tasks.borrow().stats())
            .field("sources", &*core.sources.borrow())
            .field("iterations", &core.iterations.get())
            .finish()
    }
}

/// Builder for an [`EventLoop`] with a custom configuration or clock.
#[derive(Debug, Default)]
pub struct EventLoopBuilder {
    config: LoopConfig,
    clock: Option<Arc<dyn TimeSource>>,
}

impl EventLoopBuilder {
    /// Starts from the default configuration and a wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `clock` for every deadline and sleep.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the microtask iteration cap.
    #[must_use]
    pub fn microtask_cap(mut self, cap: usize) -> Self {
        self.config.microtask_cap = cap;
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub fn graceful_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.graceful_shutdown_timeout = timeout;
        self
    }

    /// Validates the configuration and creates the loop.
    pub fn build(self) -> Result<EventLoop> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(WallClock::new()));
        Ok(EventLoop::from_parts(self.config, clock))
    }
}
