//! Task capability context.
//!
//! Every task body receives a [`Cx`]: a cheap clonable handle to its
//! own task record. All cooperative operations go through it, which
//! keeps "which task am I" explicit instead of ambient. The ambient
//! view still exists for code that cannot thread a `Cx` through, see
//! [`current_task`].

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use crate::error::Cancelled;
use crate::runtime::{spawn_task, TaskContext, TaskHandle};
use crate::types::{CancelReason, TaskId};

thread_local! {
    static CURRENT_TASK: RefCell<Option<Cx>> = const { RefCell::new(None) };
}

/// Capability context of a running task.
///
/// Cloning is cheap; clones refer to the same task.
#[derive(Clone)]
pub struct Cx {
    context: Arc<TaskContext>,
}

impl Cx {
    pub(crate) fn from_context(context: Arc<TaskContext>) -> Self {
        Self { context }
    }

    /// Id of the task this context belongs to.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.context.id()
    }

    /// Whether cancellation has been requested for this task. The flag
    /// is sticky; masking delivery with a blocker does not clear it.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.context.is_cancel_requested()
    }

    /// The reason of the first cancellation request, if any.
    #[must_use]
    pub fn cancellation_reason(&self) -> Option<CancelReason> {
        self.context.cancel_reason()
    }

    pub(crate) fn cancellation_deliverable(&self) -> bool {
        self.context.cancellation_deliverable()
    }

    /// Non-suspending cancellation check. Returns `Err` when a
    /// cancellation is pending and deliverable, for `?`-style early
    /// return from task bodies.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.cancellation_deliverable() {
            Err(Cancelled {
                reason: self.cancellation_reason().unwrap_or_default(),
            })
        } else {
            Ok(())
        }
    }

    /// Suspending cancellation point. Completes immediately when no
    /// deliverable cancellation is pending; otherwise the task stops
    /// here for good, its future is dropped and it finishes in the
    /// `Cancelled` state. Local destructors run as usual.
    pub fn cancellation_point(&self) -> CancellationPoint<'_> {
        CancellationPoint { cx: self }
    }

    /// Reschedules the task to the back of the run queue, giving other
    /// runnable tasks a chance to execute.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow { yielded: false }
    }

    /// Masks cancellation delivery for the lifetime of the returned
    /// guard. Guards nest. A request arriving while masked still sets
    /// the flag but wakes nothing and interrupts nothing.
    #[must_use = "cancellation is only masked while the blocker is held"]
    pub fn block_cancellation(&self) -> CancellationBlocker<'_> {
        self.context.enter_cancellation_blocker();
        CancellationBlocker { cx: self }
    }

    /// Stack size of the worker threads this task runs on.
    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.context.worker_stack_size()
    }

    /// Spawns a subtask on the same runtime.
    ///
    /// # Panics
    ///
    /// Panics if the runtime has already shut down.
    pub fn spawn<F, Fut, T>(&self, body: F) -> TaskHandle<T>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = self
            .context
            .shared()
            .expect("cannot spawn: runtime has shut down");
        spawn_task(&shared, false, body)
    }

    /// Spawns a critical subtask, exempt from overload shedding and
    /// from pre-start cancellation drops.
    ///
    /// # Panics
    ///
    /// Panics if the runtime has already shut down.
    pub fn spawn_critical<F, Fut, T>(&self, body: F) -> TaskHandle<T>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = self
            .context
            .shared()
            .expect("cannot spawn: runtime has shut down");
        spawn_task(&shared, true, body)
    }

    /// The context of the task currently executing on this thread.
    #[must_use]
    pub fn current() -> Option<Cx> {
        CURRENT_TASK.with(|slot| slot.borrow().clone())
    }

    /// Installs `cx` as the current task for the guard's lifetime,
    /// restoring the previous value afterwards. Worker-side only.
    pub(crate) fn set_current(cx: Option<Cx>) -> CurrentTaskGuard {
        let previous = CURRENT_TASK.with(|slot| slot.replace(cx));
        CurrentTaskGuard { previous }
    }

    pub(crate) fn register_timer(&self, deadline: Instant, waker: &Waker) {
        if let Some(shared) = self.context.shared() {
            shared.timer().register(deadline, waker.clone());
        }
    }
}

impl std::fmt::Debug for Cx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cx")
            .field("task_id", &self.task_id())
            .finish_non_exhaustive()
    }
}

pub(crate) struct CurrentTaskGuard {
    previous: Option<Cx>,
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_TASK.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// RAII mask over cancellation delivery, see [`Cx::block_cancellation`].
pub struct CancellationBlocker<'a> {
    cx: &'a Cx,
}

impl Drop for CancellationBlocker<'_> {
    fn drop(&mut self) {
        self.cx.context.exit_cancellation_blocker();
    }
}

/// Future of [`Cx::cancellation_point`].
pub struct CancellationPoint<'a> {
    cx: &'a Cx,
}

impl Future for CancellationPoint<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _poll_cx: &mut Context<'_>) -> Poll<()> {
        if self.cx.cancellation_deliverable() {
            // The worker drops the task future instead of parking it.
            self.cx.context.set_unwind_requested();
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

/// Future of [`Cx::yield_now`].
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, poll_cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            poll_cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Ambient view of the current task, for code that cannot take a
/// [`Cx`] parameter, destructors in particular.
pub mod current_task {
    use super::Cx;

    /// The task executing on this thread, if any. This is set while a
    /// task is being polled and also while its state is being dropped,
    /// so destructors can tell they run in task context.
    #[must_use]
    pub fn current() -> Option<Cx> {
        Cx::current()
    }

    /// Whether the current task has a pending cancellation request.
    /// `false` outside of task context.
    #[must_use]
    pub fn is_cancel_requested() -> bool {
        Cx::current().is_some_and(|cx| cx.is_cancel_requested())
    }

    /// Suspending cancellation point on the current task. No-op when
    /// called outside of task context.
    pub async fn cancellation_point() {
        if let Some(cx) = Cx::current() {
            cx.cancellation_point().await;
        }
    }

    /// Stack size of the worker threads the current task runs on.
    ///
    /// # Panics
    ///
    /// Panics outside of task context.
    #[must_use]
    pub fn stack_size() -> usize {
        Cx::current()
            .expect("stack_size called outside of task context")
            .stack_size()
    }
}
