//! Timed suspension.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::cx::Cx;

/// Suspends the task for at least `duration`. Not a cancellation
/// point; a cancelled task sleeps out the full duration.
pub fn sleep_for(cx: &Cx, duration: Duration) -> Sleep<'_> {
    Sleep {
        cx,
        deadline: Instant::now() + duration,
        interruptible: false,
        timer_registered: false,
    }
}

/// Suspends the task for at least `duration`, returning early if the
/// task receives a deliverable cancellation. Completes normally either
/// way; callers inspect [`Cx::is_cancel_requested`] if they care.
pub fn interruptible_sleep_for(cx: &Cx, duration: Duration) -> Sleep<'_> {
    Sleep {
        cx,
        deadline: Instant::now() + duration,
        interruptible: true,
        timer_registered: false,
    }
}

/// Future of [`sleep_for`] and [`interruptible_sleep_for`].
pub struct Sleep<'a> {
    cx: &'a Cx,
    deadline: Instant,
    interruptible: bool,
    timer_registered: bool,
}

impl Future for Sleep<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, poll_cx: &mut Context<'_>) -> Poll<()> {
        if self.interruptible && self.cx.cancellation_deliverable() {
            return Poll::Ready(());
        }
        if Instant::now() >= self.deadline {
            return Poll::Ready(());
        }
        if !self.timer_registered {
            self.cx.register_timer(self.deadline, poll_cx.waker());
            self.timer_registered = true;
        }
        Poll::Pending
    }
}
