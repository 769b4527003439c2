//! Shared helpers for the integration suites.

#![allow(dead_code)]

use phaseloop::{EventLoop, LoopConfig, VirtualClock};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

pub fn init_test_logging() {
    phaseloop::test_utils::init_test_logging();
}

/// A loop on a virtual clock, so idle sleeps advance time instantly.
pub fn virtual_loop() -> (EventLoop, Arc<VirtualClock>) {
    virtual_loop_with(LoopConfig::default())
}

pub fn virtual_loop_with(config: LoopConfig) -> (EventLoop, Arc<VirtualClock>) {
    let clock = Arc::new(VirtualClock::new());
    let event_loop = EventLoop::builder()
        .config(config)
        .clock(clock.clone())
        .build()
        .expect("valid test config");
    (event_loop, clock)
}

/// Ordered record of callback labels.
#[derive(Clone, Default)]
pub struct Trace(Rc<RefCell<Vec<String>>>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, label: impl Into<String>) {
        self.0.borrow_mut().push(label.into());
    }

    /// Callback that records `label` and succeeds.
    pub fn recorder(&self, label: &str) -> impl FnOnce() -> phaseloop::CallbackResult + 'static {
        let trace = self.clone();
        let label = label.to_owned();
        move || {
            trace.push(label);
            Ok(())
        }
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}
