//! Cooperative yield point for tasks.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Suspends the calling task for one task pass.
///
/// The first poll wakes the task through its own waker and returns
/// `Pending`, which parks it behind every task already ready in the current
/// pass. It resumes in the task phase of the next cycle, after that cycle's
/// timers and lanes have had their turn.
#[derive(Debug)]
#[must_use = "yield_now does nothing unless awaited"]
pub struct YieldNow {
    parked: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if std::mem::replace(&mut this.parked, true) {
            return Poll::Ready(());
        }
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Gives the rest of the loop a turn before continuing.
pub fn yield_now() -> YieldNow {
    YieldNow { parked: false }
}
