//! Worker thread: pops runnable tasks and polls them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use tracing::{debug, trace};

use crate::cx::Cx;
use crate::error::PanicPayload;
use crate::runtime::RuntimeShared;
use crate::types::{CancelReason, TaskId};

pub(crate) fn run(shared: &Arc<RuntimeShared>, worker_index: usize) {
    trace!(worker = worker_index, "worker started");
    while let Some(task_id) = shared.queue().pop_blocking() {
        execute(shared, task_id);
    }
    trace!(worker = worker_index, "worker stopped");
}

fn execute(shared: &Arc<RuntimeShared>, task_id: TaskId) {
    // The payload may be gone if the task finished from a previous
    // poll while a stale queue entry survived.
    let Some((context, mut stored)) = shared.take_payload(task_id) else {
        return;
    };

    // A task cancelled before its first poll never runs its body. Its
    // captures are dropped right here, with the task installed as
    // current so destructors see task context. Critical tasks are
    // exempt and run at least once.
    if context.is_cancel_requested() && !context.has_started() && !context.is_critical() {
        debug!(task = %task_id, "cancelled before start, dropping body");
        let guard = Cx::set_current(Some(Cx::from_context(context.clone())));
        drop(stored);
        drop(guard);
        context.complete_cancelled(CancelReason::user_request());
        shared.remove_task(task_id);
        return;
    }

    context.begin_poll();
    let waker = Waker::from(context.clone());
    let mut poll_cx = Context::from_waker(&waker);
    let task_cx = Cx::from_context(context.clone());
    // Current-task guard spans the poll and any payload drop below, so
    // destructors of task-owned state always observe task context.
    let guard = Cx::set_current(Some(task_cx.clone()));

    let poll_result = catch_unwind(AssertUnwindSafe(|| stored.poll(&task_cx, &mut poll_cx)));

    match poll_result {
        Ok(Poll::Ready(())) => {
            drop(stored);
            drop(guard);
            context.complete(None);
            shared.remove_task(task_id);
        }
        Ok(Poll::Pending) => {
            if context.unwind_requested() {
                // A cancellation point fired: drop the future at the
                // suspension point and finish as cancelled.
                drop(stored);
                drop(guard);
                context.complete_cancelled(CancelReason::user_request());
                shared.remove_task(task_id);
            } else {
                drop(guard);
                // Payload goes back before the task can be requeued;
                // wakeups during the poll only set the notified flag.
                shared.store_payload(task_id, stored);
                context.finish_poll_pending();
            }
        }
        Err(panic) => {
            let payload = PanicPayload::from_any(panic);
            debug!(task = %task_id, panic = %payload, "task body panicked");
            drop(stored);
            drop(guard);
            context.complete(Some(payload));
            shared.remove_task(task_id);
        }
    }
}
