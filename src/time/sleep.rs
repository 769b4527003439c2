//! Timer-backed sleep future for tasks.

use crate::runtime::LoopHandle;
use crate::types::TimerId;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

#[derive(Default)]
struct Shared {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

enum State {
    Unregistered,
    Waiting { timer: TimerId, shared: Rc<Shared> },
    Done,
}

/// Future returned by [`LoopHandle::sleep`].
///
/// The first poll adds a one-shot timer; the timer wakes the task that
/// polled last. Dropping an unfinished `Sleep` cancels its timer.
#[must_use = "futures do nothing unless awaited"]
pub struct Sleep {
    handle: LoopHandle,
    duration: Duration,
    state: State,
}

impl Sleep {
    pub(crate) fn new(handle: LoopHandle, duration: Duration) -> Self {
        Self {
            handle,
            duration,
            state: State::Unregistered,
        }
    }

    /// The requested duration.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// The backing timer, once registered and until it fires.
    #[must_use]
    pub fn timer(&self) -> Option<TimerId> {
        match &self.state {
            State::Waiting { timer, shared } if !shared.fired.get() => Some(*timer),
            _ => None,
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match &this.state {
            State::Done => Poll::Ready(()),
            State::Waiting { shared, .. } => {
                if shared.fired.get() {
                    this.state = State::Done;
                    Poll::Ready(())
                } else {
                    *shared.waker.borrow_mut() = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
            State::Unregistered => {
                if this.duration.is_zero() {
                    this.state = State::Done;
                    return Poll::Ready(());
                }
                let shared = Rc::new(Shared::default());
                *shared.waker.borrow_mut() = Some(cx.waker().clone());
                let on_fire = Rc::clone(&shared);
                let timer = this.handle.add_timer(this.duration, move || {
                    on_fire.fired.set(true);
                    let waker = on_fire.waker.borrow_mut().take();
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                    Ok(())
                });
                this.state = State::Waiting { timer, shared };
                Poll::Pending
            }
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let State::Waiting { timer, shared } = &self.state {
            if !shared.fired.get() {
                self.handle.cancel_timer(*timer);
            }
        }
    }
}

impl std::fmt::Debug for Sleep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sleep")
            .field("duration", &self.duration)
            .field("timer", &self.timer())
            .finish()
    }
}
