//! Condition variable for task-aware mutexes.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::cx::Cx;
use crate::sync::mutex::{MutexGuard, Relock};

/// Outcome of a condition-variable wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvStatus {
    /// Woken by a notification.
    NoTimeout,
    /// The deadline elapsed first.
    Timeout,
    /// The waiting task received a deliverable cancellation.
    Cancelled,
}

/// Condition variable whose waits suspend the task, release the
/// associated [`Mutex`](crate::sync::Mutex) atomically, and reacquire
/// it before returning.
///
/// Waits are cancellation-aware: a deliverable cancellation of the
/// waiting task ends the wait with [`CvStatus::Cancelled`]. Which
/// outcome wins a race is decided by whoever dequeues the waiter
/// first; a notification that already claimed the waiter is honored
/// even if cancellation is pending.
pub struct ConditionVariable {
    queue: parking_lot::Mutex<WaiterQueue>,
}

struct WaiterQueue {
    waiters: VecDeque<CvWaiter>,
    next_waiter_id: u64,
}

struct CvWaiter {
    id: u64,
    /// Filled in at the waiter's first poll. A waiter dequeued before
    /// that has not suspended yet and needs no wake.
    waker: Option<Waker>,
}

impl ConditionVariable {
    /// Creates a condition variable with no waiters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: parking_lot::Mutex::new(WaiterQueue {
                waiters: VecDeque::new(),
                next_waiter_id: 0,
            }),
        }
    }

    /// Wakes the longest-waiting task. No-op when none is waiting;
    /// notifications are not stored.
    pub fn notify_one(&self) {
        let woken = self.queue.lock().waiters.pop_front();
        if let Some(CvWaiter {
            waker: Some(waker), ..
        }) = woken
        {
            waker.wake();
        }
    }

    /// Wakes every currently waiting task.
    pub fn notify_all(&self) {
        let woken: Vec<CvWaiter> = {
            let mut queue = self.queue.lock();
            queue.waiters.drain(..).collect()
        };
        for waiter in woken {
            if let Some(waker) = waiter.waker {
                waker.wake();
            }
        }
    }

    /// Releases `guard`'s mutex, waits for a notification or a
    /// deliverable cancellation of the calling task, and reacquires
    /// the mutex before returning.
    ///
    /// Returns [`CvStatus::NoTimeout`] or [`CvStatus::Cancelled`]. The
    /// mutex is held again on return either way.
    pub async fn wait<T: ?Sized>(&self, cx: &Cx, guard: &mut MutexGuard<'_, T>) -> CvStatus {
        self.wait_with_deadline(cx, guard, None).await
    }

    /// [`ConditionVariable::wait`] with a timeout.
    pub async fn wait_for<T: ?Sized>(
        &self,
        cx: &Cx,
        guard: &mut MutexGuard<'_, T>,
        timeout: Duration,
    ) -> CvStatus {
        self.wait_with_deadline(cx, guard, Some(Instant::now() + timeout))
            .await
    }

    /// Waits until `predicate` holds over the protected value.
    ///
    /// The predicate is evaluated under the mutex, first before any
    /// suspension and then after every wakeup. Returns `true` when the
    /// predicate held, `false` when the wait was cut short by
    /// cancellation and the predicate still does not hold.
    pub async fn wait_until<T: ?Sized, P>(
        &self,
        cx: &Cx,
        guard: &mut MutexGuard<'_, T>,
        mut predicate: P,
    ) -> bool
    where
        P: FnMut(&mut T) -> bool,
    {
        loop {
            if predicate(&mut *guard) {
                return true;
            }
            match self.wait(cx, guard).await {
                CvStatus::NoTimeout => {}
                CvStatus::Timeout | CvStatus::Cancelled => return predicate(&mut *guard),
            }
        }
    }

    /// [`ConditionVariable::wait_until`] with a timeout. Returns the
    /// final value of the predicate.
    pub async fn wait_for_until<T: ?Sized, P>(
        &self,
        cx: &Cx,
        guard: &mut MutexGuard<'_, T>,
        timeout: Duration,
        mut predicate: P,
    ) -> bool
    where
        P: FnMut(&mut T) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&mut *guard) {
                return true;
            }
            match self.wait_with_deadline(cx, guard, Some(deadline)).await {
                CvStatus::NoTimeout => {}
                CvStatus::Timeout | CvStatus::Cancelled => return predicate(&mut *guard),
            }
        }
    }

    async fn wait_with_deadline<T: ?Sized>(
        &self,
        cx: &Cx,
        guard: &mut MutexGuard<'_, T>,
        deadline: Option<Instant>,
    ) -> CvStatus {
        // Entry checks run while the mutex is still held; a wait that
        // cannot park reports its cause without releasing it.
        if cx.cancellation_deliverable() {
            return CvStatus::Cancelled;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return CvStatus::Timeout;
        }

        // Queue membership is established before the mutex is
        // released, so a notification arriving in between cannot be
        // lost: it dequeues this waiter and the first poll sees that.
        let waiter_id = self.enqueue_waiter();
        let mutex = guard.mutex();
        guard.release_for_wait();
        let status = CvWait {
            cv: self,
            cx,
            deadline,
            waiter_id,
            timer_registered: false,
            finished: false,
        }
        .await;
        // Reacquisition is not a cancellation point; the caller gets
        // the mutex back no matter how the wait ended.
        Relock::new(mutex).await;
        guard.restore();
        status
    }

    fn enqueue_waiter(&self) -> u64 {
        let mut queue = self.queue.lock();
        let id = queue.next_waiter_id;
        queue.next_waiter_id += 1;
        queue.waiters.push_back(CvWaiter { id, waker: None });
        id
    }

    fn remove_waiter(&self, id: u64) {
        self.queue.lock().waiters.retain(|waiter| waiter.id != id);
    }
}

impl Default for ConditionVariable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConditionVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionVariable")
            .field("waiters", &self.queue.lock().waiters.len())
            .finish_non_exhaustive()
    }
}

/// Parked phase of a wait. Queue membership doubles as the wakeup
/// protocol: a notifier removes the waiter it is waking, so absence
/// from the queue means "notified".
struct CvWait<'a> {
    cv: &'a ConditionVariable,
    cx: &'a Cx,
    deadline: Option<Instant>,
    waiter_id: u64,
    timer_registered: bool,
    finished: bool,
}

impl Future for CvWait<'_> {
    type Output = CvStatus;

    fn poll(mut self: Pin<&mut Self>, poll_cx: &mut Context<'_>) -> Poll<CvStatus> {
        let this = &mut *self;
        let mut queue = this.cv.queue.lock();
        let position = queue
            .waiters
            .iter()
            .position(|waiter| waiter.id == this.waiter_id);
        let Some(position) = position else {
            // A notifier dequeued us; it claimed this wakeup even if
            // cancellation or the deadline arrived meanwhile.
            this.finished = true;
            return Poll::Ready(CvStatus::NoTimeout);
        };
        if this.cx.cancellation_deliverable() {
            queue.waiters.remove(position);
            this.finished = true;
            return Poll::Ready(CvStatus::Cancelled);
        }
        if this
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            queue.waiters.remove(position);
            this.finished = true;
            return Poll::Ready(CvStatus::Timeout);
        }
        if let Some(waiter) = queue.waiters.get_mut(position) {
            waiter.waker = Some(poll_cx.waker().clone());
        }
        drop(queue);
        if let Some(deadline) = this.deadline {
            if !this.timer_registered {
                this.cx.register_timer(deadline, poll_cx.waker());
                this.timer_registered = true;
            }
        }
        Poll::Pending
    }
}

impl Drop for CvWait<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cv.remove_waiter(self.waiter_id);
        }
    }
}
