//! Per-task bookkeeping: lifecycle state, cancellation flags, and the
//! schedule-state machine that makes wakeups enqueue exactly once.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Wake, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use tracing::trace;

use crate::error::PanicPayload;
use crate::runtime::RuntimeShared;
use crate::types::{CancelReason, TaskId, TaskState};

/// Where the task sits relative to the run queue.
///
/// Transitions happen under the context lock, which is what makes a
/// wakeup enqueue the task exactly once:
///
/// ```text
/// Idle ----wake----> Queued ----worker picks up----> Polling
/// Polling --wake---> Notified --poll returns Pending--> Queued
/// Polling --poll returns Pending--> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedState {
    /// Suspended, not in the queue. A wake moves it to `Queued`.
    Idle,
    /// In the run queue awaiting a worker.
    Queued,
    /// A worker is polling it right now.
    Polling,
    /// Woken while being polled; requeue once the poll returns.
    Notified,
}

struct ContextInner {
    state: TaskState,
    sched: SchedState,
    cancel_reason: Option<CancelReason>,
    panic: Option<PanicPayload>,
    /// Wakers of futures waiting for this task to reach a terminal
    /// state (handle wait/get and friends).
    finish_wakers: SmallVec<[Waker; 4]>,
}

/// Shared per-task record. Referenced by the runtime's task table, the
/// task's handle, its `Cx`, and any waker derived from it.
pub(crate) struct TaskContext {
    id: TaskId,
    critical: bool,
    worker_stack_size: usize,
    /// Fast mirror of `inner.cancel_reason.is_some()`.
    cancel_requested: AtomicBool,
    /// Cancellation blocker nesting depth. Nonzero masks delivery.
    mask_depth: AtomicU32,
    /// Set by an awaited cancellation point; tells the worker to drop
    /// the task future instead of suspending it.
    unwind_requested: AtomicBool,
    /// True once the body has begun executing.
    started: AtomicBool,
    inner: Mutex<ContextInner>,
    /// Signalled on transition to a terminal state, for blocking waits.
    terminal_cv: Condvar,
    shared: Weak<RuntimeShared>,
}

impl TaskContext {
    pub(crate) fn new(
        id: TaskId,
        critical: bool,
        worker_stack_size: usize,
        shared: Weak<RuntimeShared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            critical,
            worker_stack_size,
            cancel_requested: AtomicBool::new(false),
            mask_depth: AtomicU32::new(0),
            unwind_requested: AtomicBool::new(false),
            started: AtomicBool::new(false),
            inner: Mutex::new(ContextInner {
                state: TaskState::New,
                sched: SchedState::Idle,
                cancel_reason: None,
                panic: None,
                finish_wakers: SmallVec::new(),
            }),
            terminal_cv: Condvar::new(),
            shared,
        })
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn is_critical(&self) -> bool {
        self.critical
    }

    pub(crate) fn worker_stack_size(&self) -> usize {
        self.worker_stack_size
    }

    pub(crate) fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    pub(crate) fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn shared(&self) -> Option<Arc<RuntimeShared>> {
        self.shared.upgrade()
    }

    // Cancellation protocol.

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    pub(crate) fn cancel_reason(&self) -> Option<CancelReason> {
        self.inner.lock().cancel_reason
    }

    /// True when a pending cancellation may be acted upon, i.e. the
    /// flag is set and no blocker is active.
    pub(crate) fn cancellation_deliverable(&self) -> bool {
        self.is_cancel_requested() && self.mask_depth.load(Ordering::Acquire) == 0
    }

    pub(crate) fn enter_cancellation_blocker(&self) {
        self.mask_depth.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn exit_cancellation_blocker(&self) {
        let prev = self.mask_depth.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced cancellation blocker");
    }

    pub(crate) fn set_unwind_requested(&self) {
        self.unwind_requested.store(true, Ordering::Release);
    }

    pub(crate) fn unwind_requested(&self) -> bool {
        self.unwind_requested.load(Ordering::Acquire)
    }

    /// Requests cancellation. First request wins; later requests and
    /// requests against a terminal task are no-ops. Wakes the task so
    /// pending interruptible waits observe the flag, unless delivery
    /// is currently masked by a blocker.
    pub(crate) fn request_cancel(self: &Arc<Self>, reason: CancelReason) {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() || inner.cancel_reason.is_some() {
                return;
            }
            inner.cancel_reason = Some(reason);
            self.cancel_requested.store(true, Ordering::Release);
        }
        trace!(task = %self.id, %reason, "cancellation requested");
        if self.mask_depth.load(Ordering::Acquire) == 0 {
            self.schedule();
        }
    }

    /// Sets the cancellation flag without waking the task. Used before
    /// the task is first enqueued (overload shedding at spawn).
    pub(crate) fn preset_cancel(&self, reason: CancelReason) {
        let mut inner = self.inner.lock();
        if inner.cancel_reason.is_none() {
            inner.cancel_reason = Some(reason);
            self.cancel_requested.store(true, Ordering::Release);
        }
    }

    // Scheduling.

    /// Wakes the task: enqueues it if suspended, or records the wakeup
    /// if a worker is polling it right now. No-op once terminal.
    pub(crate) fn schedule(self: &Arc<Self>) {
        let push = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            match inner.sched {
                SchedState::Idle => {
                    inner.sched = SchedState::Queued;
                    inner.state = TaskState::Queued;
                    true
                }
                SchedState::Polling => {
                    inner.sched = SchedState::Notified;
                    false
                }
                SchedState::Queued | SchedState::Notified => false,
            }
        };
        if push {
            if let Some(shared) = self.shared.upgrade() {
                shared.queue().push(self.id);
            }
        }
    }

    /// First enqueue at spawn. The caller pushes onto the run queue
    /// itself, after inserting the task into the table.
    pub(crate) fn mark_spawned(&self) {
        let mut inner = self.inner.lock();
        debug_assert_eq!(inner.state, TaskState::New);
        inner.state = TaskState::Queued;
        inner.sched = SchedState::Queued;
    }

    /// Worker picked the task up; the poll is about to run.
    pub(crate) fn begin_poll(&self) {
        let mut inner = self.inner.lock();
        debug_assert_eq!(inner.sched, SchedState::Queued);
        inner.sched = SchedState::Polling;
        inner.state = TaskState::Running;
        self.started.store(true, Ordering::Release);
    }

    /// Poll returned `Pending`: either park the task or, if it was
    /// woken mid-poll, put it straight back on the queue.
    pub(crate) fn finish_poll_pending(self: &Arc<Self>) {
        let requeue = {
            let mut inner = self.inner.lock();
            match inner.sched {
                SchedState::Polling => {
                    inner.sched = SchedState::Idle;
                    inner.state = TaskState::Suspended;
                    false
                }
                SchedState::Notified => {
                    inner.sched = SchedState::Queued;
                    inner.state = TaskState::Queued;
                    true
                }
                SchedState::Idle | SchedState::Queued => unreachable!("poll finished while not polling"),
            }
        };
        if requeue {
            if let Some(shared) = self.shared.upgrade() {
                shared.queue().push(self.id);
            }
        }
    }

    /// Transitions to `Completed`, optionally recording a panic from
    /// the body. Wakes every finish waiter.
    pub(crate) fn complete(&self, panic: Option<PanicPayload>) {
        self.finish(TaskState::Completed, panic, None);
    }

    /// Transitions to `Cancelled`. Uses the recorded cancel reason,
    /// falling back to `fallback` when the task is being reaped
    /// without an explicit request.
    pub(crate) fn complete_cancelled(&self, fallback: CancelReason) {
        self.finish(TaskState::Cancelled, None, Some(fallback));
    }

    fn finish(
        &self,
        state: TaskState,
        panic: Option<PanicPayload>,
        fallback_reason: Option<CancelReason>,
    ) {
        let wakers = {
            let mut inner = self.inner.lock();
            debug_assert!(!inner.state.is_terminal());
            inner.state = state;
            inner.sched = SchedState::Idle;
            if let Some(panic) = panic {
                inner.panic = Some(panic);
            }
            if let Some(fallback) = fallback_reason {
                if inner.cancel_reason.is_none() {
                    inner.cancel_reason = Some(fallback);
                    self.cancel_requested.store(true, Ordering::Release);
                }
            }
            std::mem::take(&mut inner.finish_wakers)
        };
        trace!(task = %self.id, %state, "task finished");
        self.terminal_cv.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }

    pub(crate) fn take_panic(&self) -> Option<PanicPayload> {
        self.inner.lock().panic.take()
    }

    // Finish waiters.

    /// Registers `waker` to fire on the terminal transition. Returns
    /// `true` if the task is already terminal, in which case nothing
    /// was registered.
    pub(crate) fn register_finish_waker(&self, waker: &Waker) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return true;
        }
        if let Some(existing) = inner
            .finish_wakers
            .iter_mut()
            .find(|existing| existing.will_wake(waker))
        {
            existing.clone_from(waker);
        } else {
            inner.finish_wakers.push(waker.clone());
        }
        false
    }

    /// Blocks the calling thread until the task is terminal or the
    /// timeout elapses. Returns `true` if the task finished.
    pub(crate) fn wait_terminal_blocking(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut inner = self.inner.lock();
        loop {
            if inner.state.is_terminal() {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.terminal_cv.wait_for(&mut inner, deadline - now);
                }
                None => self.terminal_cv.wait(&mut inner),
            }
        }
    }
}

/// Waking a task is scheduling it.
impl Wake for TaskContext {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}
