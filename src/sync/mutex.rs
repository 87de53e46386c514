//! Task-aware mutual exclusion.

use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use parking_lot::{RwLock, RwLockWriteGuard};

/// Mutex whose `lock` suspends the task instead of blocking the
/// worker thread.
///
/// Waiters are served strictly FIFO: unlock hands ownership directly
/// to the oldest waiter, so no task can barge past one that queued
/// earlier. Acquisition is deliberately not a cancellation point; a
/// cancelled task still gets the lock and runs its critical section,
/// which keeps lock-based cleanup code correct under cancellation.
pub struct Mutex<T: ?Sized> {
    state: parking_lot::Mutex<LockState>,
    /// The protected value. The write lock here is only ever taken by
    /// the task that holds logical ownership per `state`, so it never
    /// contends.
    data: RwLock<T>,
}

struct LockState {
    locked: bool,
    /// Waiter the last unlock handed the lock to. It owns the mutex
    /// (`locked` stays true) but has not resumed yet.
    granted: Option<u64>,
    waiters: VecDeque<LockWaiter>,
    next_waiter_id: u64,
}

struct LockWaiter {
    id: u64,
    waker: Waker,
}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex protecting `value`.
    pub fn new(value: T) -> Self {
        Self {
            state: parking_lot::Mutex::new(LockState {
                locked: false,
                granted: None,
                waiters: VecDeque::new(),
                next_waiter_id: 0,
            }),
            data: RwLock::new(value),
        }
    }

    /// Consumes the mutex, returning the protected value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, suspending the task while it is held by
    /// another owner. Not interruptible by cancellation.
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            waiter_id: None,
            acquired: false,
        }
    }

    /// Acquires the mutex only if it is free and no task is queued for
    /// it; grabbing it ahead of queued waiters would break FIFO order.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.locked || state.granted.is_some() || !state.waiters.is_empty() {
            return None;
        }
        state.locked = true;
        drop(state);
        Some(MutexGuard {
            mutex: self,
            data: Some(self.data.write()),
        })
    }

    /// Exclusive access through a mutable reference, no locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// One poll step of acquisition. `waiter_id` records queue
    /// membership across polls.
    fn poll_acquire(&self, waiter_id: &mut Option<u64>, waker: &Waker) -> Poll<()> {
        let mut state = self.state.lock();
        match *waiter_id {
            None => {
                if !state.locked {
                    state.locked = true;
                    return Poll::Ready(());
                }
                let id = state.next_waiter_id;
                state.next_waiter_id += 1;
                state.waiters.push_back(LockWaiter {
                    id,
                    waker: waker.clone(),
                });
                *waiter_id = Some(id);
                Poll::Pending
            }
            Some(id) => {
                if state.granted == Some(id) {
                    // Unlock already passed ownership to us.
                    state.granted = None;
                    return Poll::Ready(());
                }
                if let Some(waiter) = state.waiters.iter_mut().find(|waiter| waiter.id == id) {
                    waiter.waker.clone_from(waker);
                }
                Poll::Pending
            }
        }
    }

    /// Releases logical ownership, handing the lock to the oldest
    /// waiter if any.
    fn unlock(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.locked, "unlock of unlocked mutex");
        match state.waiters.pop_front() {
            Some(next) => {
                // Direct handoff: the mutex stays locked on behalf of
                // the woken waiter.
                state.granted = Some(next.id);
                drop(state);
                next.waker.wake();
            }
            None => {
                state.locked = false;
            }
        }
    }

    /// Drops out of the wait queue, forwarding an in-flight grant to
    /// the next waiter.
    fn abandon_wait(&self, id: u64) {
        let mut state = self.state.lock();
        if state.granted == Some(id) {
            // An unconsumed grant is equivalent to owning the lock.
            state.granted = None;
            drop(state);
            self.unlock();
            return;
        }
        state.waiters.retain(|waiter| waiter.id != id);
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + std::fmt::Debug> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Mutex");
        match self.data.try_read() {
            Some(value) => s.field("data", &&*value),
            None => s.field("data", &"<locked>"),
        };
        s.finish_non_exhaustive()
    }
}

/// Future of [`Mutex::lock`].
pub struct Lock<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    waiter_id: Option<u64>,
    acquired: bool,
}

impl<'a, T: ?Sized> Future for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(mut self: Pin<&mut Self>, poll_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match this.mutex.poll_acquire(&mut this.waiter_id, poll_cx.waker()) {
            Poll::Ready(()) => {
                this.acquired = true;
                Poll::Ready(MutexGuard {
                    mutex: this.mutex,
                    data: Some(this.mutex.data.write()),
                })
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: ?Sized> Drop for Lock<'_, T> {
    fn drop(&mut self) {
        if !self.acquired {
            if let Some(id) = self.waiter_id {
                self.mutex.abandon_wait(id);
            }
        }
    }
}

/// Bare reacquisition future, used when a condition variable wait
/// relocks the mutex for an existing guard.
pub(crate) struct Relock<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    waiter_id: Option<u64>,
    acquired: bool,
}

impl<'a, T: ?Sized> Relock<'a, T> {
    pub(crate) fn new(mutex: &'a Mutex<T>) -> Self {
        Self {
            mutex,
            waiter_id: None,
            acquired: false,
        }
    }
}

impl<T: ?Sized> Future for Relock<'_, T> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, poll_cx: &mut Context<'_>) -> Poll<()> {
        let this = &mut *self;
        match this.mutex.poll_acquire(&mut this.waiter_id, poll_cx.waker()) {
            Poll::Ready(()) => {
                this.acquired = true;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: ?Sized> Drop for Relock<'_, T> {
    fn drop(&mut self) {
        if !self.acquired {
            if let Some(id) = self.waiter_id {
                self.mutex.abandon_wait(id);
            }
        }
    }
}

/// RAII guard of [`Mutex`]. Unlocks on drop.
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    /// `None` while released for a condition-variable wait.
    data: Option<RwLockWriteGuard<'a, T>>,
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }

    /// Drops the data guard and unlocks, leaving this guard empty.
    /// Only a condition-variable wait does this, and it restores the
    /// guard before handing it back to the caller.
    pub(crate) fn release_for_wait(&mut self) {
        if self.data.take().is_some() {
            self.mutex.unlock();
        }
    }

    /// Counterpart of [`MutexGuard::release_for_wait`], called after
    /// logical ownership has been reacquired.
    pub(crate) fn restore(&mut self) {
        debug_assert!(self.data.is_none());
        self.data = Some(self.mutex.data.write());
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data
            .as_deref()
            .expect("mutex guard used while released for wait")
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
            .as_deref_mut()
            .expect("mutex guard used while released for wait")
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // Data guard drops first so the next owner's data.write()
        // cannot contend.
        if self.data.take().is_some() {
            self.mutex.unlock();
        }
    }
}
