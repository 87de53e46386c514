//! Owning handle to a spawned task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::cx::Cx;
use crate::error::{TaskError, WaitInterrupted};
use crate::runtime::TaskContext;
use crate::types::{CancelReason, TaskId, TaskState};

/// Slot the task body writes its result into on normal completion.
pub(crate) type ResultSlot<T> = Arc<Mutex<Option<T>>>;

struct HandleInner<T> {
    context: Arc<TaskContext>,
    result: ResultSlot<T>,
}

/// Owning handle to a spawned task.
///
/// Dropping a live handle requests cancellation and detaches; the
/// runtime finishes the task in the background. Use
/// [`TaskHandle::detach`] to let the task run to completion unowned.
///
/// After [`TaskHandle::get`] or [`TaskHandle::detach`] the handle is
/// invalid and every other operation panics.
pub struct TaskHandle<T> {
    inner: Option<HandleInner<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(context: Arc<TaskContext>, result: ResultSlot<T>) -> Self {
        Self {
            inner: Some(HandleInner { context, result }),
        }
    }

    fn inner(&self) -> &HandleInner<T> {
        self.inner.as_ref().expect("task handle is invalid")
    }

    /// Whether the handle still refers to a task. `false` after `get`
    /// or `detach`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Id of the task.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.inner().context.id()
    }

    /// Current lifecycle state of the task.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner().context.state()
    }

    /// Whether the task has reached a terminal state.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Requests cooperative cancellation. Idempotent; the first
    /// request's reason sticks. Does not wait.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn request_cancel(&self) {
        self.request_cancel_with(CancelReason::user_request());
    }

    /// [`TaskHandle::request_cancel`] with an explicit reason, e.g. a
    /// deadline enforced by the caller.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn request_cancel_with(&self, reason: CancelReason) {
        self.inner().context.request_cancel(reason);
    }

    /// Waits until the task finishes. Interruptible: if the *waiting*
    /// task is cancelled while blocked here, returns `Err` carrying
    /// the waiter's own cancellation reason.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn wait<'a>(&'a self, cx: &'a Cx) -> WaitFinished<'a> {
        WaitFinished {
            target: &self.inner().context,
            waiter: Some(cx),
            deadline: None,
            timer_registered: false,
        }
    }

    /// Waits up to `timeout` for the task to finish. `Ok(true)` if it
    /// finished, `Ok(false)` on timeout, `Err` if the waiting task was
    /// cancelled meanwhile.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn wait_for<'a>(&'a self, cx: &'a Cx, timeout: Duration) -> WaitFinished<'a> {
        WaitFinished {
            target: &self.inner().context,
            waiter: Some(cx),
            deadline: Some(Instant::now() + timeout),
            timer_registered: false,
        }
    }

    /// Uninterruptible wait for the terminal state. Used by
    /// [`TaskHandle::sync_cancel`]; ignores the waiter's cancellation.
    fn finished(&self) -> WaitFinished<'_> {
        WaitFinished {
            target: &self.inner().context,
            waiter: None,
            deadline: None,
            timer_registered: false,
        }
    }

    /// Waits for the task and takes its outcome, invalidating the
    /// handle. An interrupted wait leaves the handle valid so the call
    /// can be retried.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub async fn get(&mut self, cx: &Cx) -> Result<T, TaskError> {
        if let Err(interrupted) = self.wait(cx).await {
            return Err(TaskError::WaitInterrupted(interrupted.reason));
        }
        let inner = self.inner.take().expect("task handle is invalid");
        Self::extract(&inner)
    }

    /// Blocking variant of [`TaskHandle::get`] for non-task threads.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn get_blocking(&mut self) -> Result<T, TaskError> {
        self.inner().context.wait_terminal_blocking(None);
        let inner = self.inner.take().expect("task handle is invalid");
        Self::extract(&inner)
    }

    /// Blocking wait for the terminal state, for non-task threads.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn wait_blocking(&self) {
        self.inner().context.wait_terminal_blocking(None);
    }

    /// Blocking timed wait. `true` if the task finished.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn wait_for_blocking(&self, timeout: Duration) -> bool {
        self.inner().context.wait_terminal_blocking(Some(timeout))
    }

    /// Requests cancellation and waits until the task actually
    /// finishes. Idempotent, and exempt from the waiter's own
    /// cancellation: a cancelled caller still sees the target through
    /// to a terminal state.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub async fn sync_cancel(&self) {
        self.request_cancel();
        let _ = self.finished().await;
    }

    /// Blocking variant of [`TaskHandle::sync_cancel`].
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn sync_cancel_blocking(&self) {
        self.request_cancel();
        self.inner().context.wait_terminal_blocking(None);
    }

    /// Releases ownership without cancelling. The task keeps running;
    /// its result is discarded. The handle becomes invalid.
    pub fn detach(mut self) {
        if let Some(inner) = self.inner.take() {
            debug!(task = %inner.context.id(), "task detached");
        }
    }

    fn extract(inner: &HandleInner<T>) -> Result<T, TaskError> {
        match inner.context.state() {
            TaskState::Cancelled => Err(TaskError::Cancelled(
                inner.context.cancel_reason().unwrap_or_default(),
            )),
            TaskState::Completed => {
                if let Some(panic) = inner.context.take_panic() {
                    return Err(TaskError::Panicked(panic));
                }
                Ok(inner
                    .result
                    .lock()
                    .take()
                    .expect("completed task left no result"))
            }
            state => unreachable!("task not terminal after wait: {state}"),
        }
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if !inner.context.state().is_terminal() {
                debug!(task = %inner.context.id(), "live handle dropped, cancelling");
                inner
                    .context
                    .request_cancel(CancelReason::user_request_with("task handle dropped"));
            }
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("TaskHandle");
        match &self.inner {
            Some(inner) => s
                .field("task_id", &inner.context.id())
                .field("state", &inner.context.state()),
            None => s.field("valid", &false),
        };
        s.finish_non_exhaustive()
    }
}

/// Future waiting for a task to reach a terminal state.
///
/// Resolves to `Ok(true)` when the task finished, `Ok(false)` when the
/// deadline passed first, and `Err` when the waiting task received a
/// deliverable cancellation. Without a waiter context the wait is
/// uninterruptible.
pub struct WaitFinished<'a> {
    target: &'a Arc<TaskContext>,
    waiter: Option<&'a Cx>,
    deadline: Option<Instant>,
    timer_registered: bool,
}

impl Future for WaitFinished<'_> {
    type Output = Result<bool, WaitInterrupted>;

    fn poll(mut self: Pin<&mut Self>, poll_cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.target.state().is_terminal() {
            return Poll::Ready(Ok(true));
        }
        if let Some(waiter) = self.waiter {
            if waiter.cancellation_deliverable() {
                return Poll::Ready(Err(WaitInterrupted {
                    reason: waiter.cancellation_reason().unwrap_or_default(),
                }));
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Poll::Ready(Ok(false));
            }
            if !self.timer_registered {
                if let Some(waiter) = self.waiter {
                    waiter.register_timer(deadline, poll_cx.waker());
                    self.timer_registered = true;
                }
            }
        }
        if self.target.register_finish_waker(poll_cx.waker()) {
            return Poll::Ready(Ok(true));
        }
        Poll::Pending
    }
}
