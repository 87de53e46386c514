//! Current-task context propagation and cancellation delivery details.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use weft::time::interruptible_sleep_for;
use weft::{current_task, CancelKind, TaskError, TaskState};

use common::{spin_until, LONG_SLEEP, SHORT_WAIT};

/// Records, on drop, whether a task was installed as current.
struct ContextProbe {
    dropped_in_task_context: Arc<AtomicBool>,
    dropped: Arc<AtomicBool>,
}

impl Drop for ContextProbe {
    fn drop(&mut self) {
        self.dropped_in_task_context
            .store(current_task::current().is_some(), Ordering::SeqCst);
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[test]
fn current_task_is_set_inside_a_task() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|cx| async move {
        let current = current_task::current().expect("no current task inside a task");
        assert_eq!(current.task_id(), cx.task_id());
        assert!(!current_task::is_cancel_requested());
    });
    // Back on a plain thread there is no current task.
    assert!(current_task::current().is_none());
    assert!(!current_task::is_cancel_requested());
}

#[test]
fn early_cancelled_task_drops_captures_in_task_context() {
    let rt = common::single_worker_runtime();
    let in_context = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let probe = ContextProbe {
        dropped_in_task_context: Arc::clone(&in_context),
        dropped: Arc::clone(&dropped),
    };
    rt.block_on(move |cx| async move {
        let task = cx.spawn(move |_cx| async move {
            drop(probe);
        });
        task.request_cancel();
        assert!(task.wait_for(&cx, Duration::from_secs(5)).await.unwrap());
        assert_eq!(task.state(), TaskState::Cancelled);
    });
    assert!(dropped.load(Ordering::SeqCst));
    assert!(in_context.load(Ordering::SeqCst));
}

#[test]
fn cancel_then_detach_drops_captures_in_task_context() {
    let rt = common::single_worker_runtime();
    let in_context = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let ran = Arc::new(AtomicBool::new(false));
    {
        let in_context = Arc::clone(&in_context);
        let dropped = Arc::clone(&dropped);
        let ran = Arc::clone(&ran);
        rt.block_on(move |cx| async move {
            let probe = ContextProbe {
                dropped_in_task_context: in_context,
                dropped: Arc::clone(&dropped),
            };
            let task = cx.spawn(move |_cx| async move {
                ran.store(true, Ordering::SeqCst);
                drop(probe);
            });
            // No handle left alive: cancel, then hand the task to the
            // runtime. The cleanup must happen all the same.
            task.request_cancel();
            task.detach();
            spin_until(&cx, || dropped.load(Ordering::SeqCst)).await;
        });
    }
    assert!(!ran.load(Ordering::SeqCst));
    assert!(in_context.load(Ordering::SeqCst));
}

#[test]
fn shutdown_drops_parked_task_state_in_task_context() {
    let in_context = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    {
        let rt = common::runtime_with_workers(1);
        let probe = ContextProbe {
            dropped_in_task_context: Arc::clone(&in_context),
            dropped: Arc::clone(&dropped),
        };
        let task = rt.spawn(move |cx| async move {
            let _held = probe;
            interruptible_sleep_for(&cx, LONG_SLEEP).await;
        });
        // Let the task park in its sleep, then abandon it so runtime
        // shutdown has to reap it.
        std::thread::sleep(SHORT_WAIT);
        task.detach();
    }
    assert!(dropped.load(Ordering::SeqCst));
    assert!(in_context.load(Ordering::SeqCst));
}

#[test]
fn interrupted_wait_carries_the_waiters_reason() {
    let rt = common::single_worker_runtime();
    rt.block_on(|cx| async move {
        let long_task = cx.spawn(|cx| async move {
            interruptible_sleep_for(&cx, LONG_SLEEP).await;
        });
        let mut waiter = cx.spawn(move |cx| async move {
            let mut long_task = long_task;
            match long_task.get(&cx).await {
                Err(TaskError::WaitInterrupted(reason)) => reason,
                other => panic!("expected interrupted wait, got {other:?}"),
            }
        });
        spin_until(&cx, || waiter.state() == TaskState::Suspended).await;
        waiter.request_cancel();
        let reason = waiter.get(&cx).await.unwrap();
        assert_eq!(reason.kind(), CancelKind::UserRequest);
    });
}

#[test]
fn blocker_defers_cancellation_delivery() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|cx| async move {
        let started = Arc::new(AtomicBool::new(false));
        let task = {
            let started = Arc::clone(&started);
            cx.spawn(move |cx| async move {
                {
                    let _blocker = cx.block_cancellation();
                    started.store(true, Ordering::SeqCst);
                    interruptible_sleep_for(&cx, Duration::from_millis(200)).await;
                    // The request arrived mid-sleep but was masked.
                    assert!(cx.is_cancel_requested());
                }
                cx.cancellation_point().await;
                unreachable!("execution must stop once the blocker is gone");
            })
        };
        spin_until(&cx, || started.load(Ordering::SeqCst)).await;
        task.request_cancel();
        // Masked delivery: the sleep is not interrupted.
        assert!(!task.wait_for(&cx, Duration::from_millis(20)).await.unwrap());
        assert!(task.wait_for(&cx, Duration::from_secs(5)).await.unwrap());
        assert_eq!(task.state(), TaskState::Cancelled);
    });
}

#[test]
fn nested_blockers_unmask_in_order() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|cx| async move {
        let started = Arc::new(AtomicBool::new(false));
        let cancel_seen = Arc::new(AtomicBool::new(false));
        let task = {
            let started = Arc::clone(&started);
            let cancel_seen = Arc::clone(&cancel_seen);
            cx.spawn(move |cx| async move {
                let outer = cx.block_cancellation();
                started.store(true, Ordering::SeqCst);
                spin_until(&cx, || cancel_seen.load(Ordering::SeqCst)).await;
                {
                    let _inner = cx.block_cancellation();
                    assert!(cx.checkpoint().is_ok());
                }
                // Still masked by the outer blocker.
                assert!(cx.checkpoint().is_ok());
                drop(outer);
                cx.checkpoint()
            })
        };
        spin_until(&cx, || started.load(Ordering::SeqCst)).await;
        task.request_cancel();
        cancel_seen.store(true, Ordering::SeqCst);
        let mut task = task;
        let result = task.get(&cx).await.unwrap();
        // Delivery was deferred to the first unmasked checkpoint.
        assert_eq!(result.unwrap_err().reason.kind(), CancelKind::UserRequest);
    });
}
