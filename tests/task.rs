//! Task lifecycle: spawning, waiting, cancellation, result retrieval.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use weft::time::interruptible_sleep_for;
use weft::{CancelKind, TaskError, TaskState};

use common::{spin_until, LONG_SLEEP, SHORT_WAIT};

#[test]
fn wait_for_completed_task() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|cx| async move {
        let task = cx.spawn(|_cx| async move {});
        assert!(task.wait(&cx).await.unwrap());
        assert!(task.is_finished());
        assert_eq!(task.state(), TaskState::Completed);
    });
}

#[test]
fn wait_for_times_out_on_running_task() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|cx| async move {
        let task = cx.spawn(|cx| async move {
            interruptible_sleep_for(&cx, LONG_SLEEP).await;
        });
        assert!(!task.wait_for(&cx, Duration::from_millis(10)).await.unwrap());
        assert!(!task.is_finished());

        task.request_cancel();
        assert!(task.wait_for(&cx, Duration::from_secs(5)).await.unwrap());
        assert!(task.is_finished());
    });
}

#[test]
fn early_cancel_never_runs_body() {
    // One worker: the test body occupies it, so the spawned task
    // cannot start before the cancel request lands.
    let rt = common::single_worker_runtime();
    rt.block_on(|cx| async move {
        let ran = Arc::new(AtomicBool::new(false));
        let task = {
            let ran = Arc::clone(&ran);
            cx.spawn(move |_cx| async move {
                ran.store(true, Ordering::SeqCst);
            })
        };
        task.request_cancel();
        assert!(task.wait_for(&cx, Duration::from_secs(5)).await.unwrap());
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(!ran.load(Ordering::SeqCst));
    });
}

#[test]
fn early_cancel_releases_captures() {
    let rt = common::single_worker_runtime();
    rt.block_on(|cx| async move {
        let resource = Arc::new(());
        let observer: Weak<()> = Arc::downgrade(&resource);
        let task = cx.spawn(move |_cx| async move {
            drop(resource);
        });
        task.request_cancel();
        assert!(task.wait_for(&cx, Duration::from_secs(5)).await.unwrap());
        // The body never ran, yet its captures are gone.
        assert!(observer.upgrade().is_none());
    });
}

#[test]
fn early_cancel_critical_task_still_runs() {
    let rt = common::single_worker_runtime();
    rt.block_on(|cx| async move {
        let ran = Arc::new(AtomicBool::new(false));
        let task = {
            let ran = Arc::clone(&ran);
            cx.spawn_critical(move |_cx| async move {
                ran.store(true, Ordering::SeqCst);
            })
        };
        task.request_cancel();
        assert!(task.wait_for(&cx, Duration::from_secs(5)).await.unwrap());
        assert_eq!(task.state(), TaskState::Completed);
        assert!(ran.load(Ordering::SeqCst));
    });
}

#[test]
fn cancel_interrupts_sleep() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|cx| async move {
        let started = Arc::new(AtomicBool::new(false));
        let task = {
            let started = Arc::clone(&started);
            cx.spawn(move |cx| async move {
                started.store(true, Ordering::SeqCst);
                interruptible_sleep_for(&cx, LONG_SLEEP).await;
                assert!(cx.is_cancel_requested());
            })
        };
        spin_until(&cx, || started.load(Ordering::SeqCst)).await;
        task.request_cancel();
        assert!(task.wait_for(&cx, Duration::from_secs(5)).await.unwrap());
        assert_eq!(task.state(), TaskState::Completed);
    });
}

#[test]
fn sync_cancel_is_idempotent() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|cx| async move {
        let task = cx.spawn(|cx| async move {
            interruptible_sleep_for(&cx, LONG_SLEEP).await;
        });
        task.sync_cancel().await;
        assert!(task.is_finished());
        // Repeated cancellation of a finished task changes nothing.
        task.sync_cancel().await;
        task.request_cancel();
        assert!(task.is_finished());
    });
}

#[test]
fn cancellation_point_unwinds_task() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|cx| async move {
        let started = Arc::new(AtomicBool::new(false));
        let mut task = {
            let started = Arc::clone(&started);
            cx.spawn(move |cx| async move {
                started.store(true, Ordering::SeqCst);
                interruptible_sleep_for(&cx, LONG_SLEEP).await;
                cx.cancellation_point().await;
                unreachable!("execution must stop at the cancellation point");
            })
        };
        spin_until(&cx, || started.load(Ordering::SeqCst)).await;
        task.request_cancel();
        match task.get(&cx).await {
            Err(TaskError::Cancelled(reason)) => {
                assert_eq!(reason.kind(), CancelKind::UserRequest);
            }
            other => panic!("expected cancelled task, got {other:?}"),
        }
    });
}

#[test]
fn cancellation_point_destroys_locals() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|cx| async move {
        let resource = Arc::new(());
        let observer: Weak<()> = Arc::downgrade(&resource);
        let started = Arc::new(AtomicBool::new(false));
        let task = {
            let started = Arc::clone(&started);
            cx.spawn(move |cx| async move {
                let _held = resource;
                started.store(true, Ordering::SeqCst);
                interruptible_sleep_for(&cx, LONG_SLEEP).await;
                cx.cancellation_point().await;
            })
        };
        spin_until(&cx, || started.load(Ordering::SeqCst)).await;
        task.request_cancel();
        assert!(task.wait_for(&cx, Duration::from_secs(5)).await.unwrap());
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(observer.upgrade().is_none());
    });
}

#[test]
fn checkpoint_reports_pending_cancellation() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|cx| async move {
        let started = Arc::new(AtomicBool::new(false));
        let mut task = {
            let started = Arc::clone(&started);
            cx.spawn(move |cx| async move {
                assert!(cx.checkpoint().is_ok());
                started.store(true, Ordering::SeqCst);
                interruptible_sleep_for(&cx, LONG_SLEEP).await;
                cx.checkpoint().map(|()| "finished")
            })
        };
        spin_until(&cx, || started.load(Ordering::SeqCst)).await;
        task.request_cancel();
        let result = task.get(&cx).await.unwrap();
        assert_eq!(
            result.unwrap_err().reason.kind(),
            CancelKind::UserRequest
        );
    });
}

#[test]
fn get_returns_value_and_invalidates() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|cx| async move {
        let mut task = cx.spawn(|_cx| async move { 42 });
        assert_eq!(task.get(&cx).await.unwrap(), 42);
        assert!(!task.is_valid());
    });
}

#[test]
fn get_propagates_panic() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|cx| async move {
        let mut task = cx.spawn(|_cx| async move {
            panic!("boom");
        });
        match task.get(&cx).await {
            Err(TaskError::Panicked(payload)) => assert_eq!(payload.message(), "boom"),
            other => panic!("expected panicked task, got {other:?}"),
        }
        assert!(!task.is_valid());
    });
}

#[test]
#[should_panic(expected = "task handle is invalid")]
fn handle_unusable_after_get() {
    let rt = common::runtime_with_workers(2);
    let mut task = rt.spawn(|_cx| async move {});
    task.get_blocking().unwrap();
    let _ = task.state();
}

#[test]
fn detached_task_runs_to_completion() {
    let rt = common::runtime_with_workers(2);
    let done = Arc::new(AtomicBool::new(false));
    let task = {
        let done = Arc::clone(&done);
        rt.spawn(move |cx| async move {
            interruptible_sleep_for(&cx, Duration::from_millis(10)).await;
            done.store(true, Ordering::SeqCst);
        })
    };
    task.detach();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !done.load(Ordering::SeqCst) {
        assert!(std::time::Instant::now() < deadline, "detached task stalled");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn dropping_live_handle_cancels_task() {
    let rt = common::runtime_with_workers(2);
    let cancelled = Arc::new(AtomicBool::new(false));
    let observed = {
        let cancelled_in_task = Arc::clone(&cancelled);
        let task = rt.spawn(move |cx| async move {
            interruptible_sleep_for(&cx, LONG_SLEEP).await;
            cancelled_in_task.store(cx.is_cancel_requested(), Ordering::SeqCst);
        });
        std::thread::sleep(SHORT_WAIT);
        drop(task);
        cancelled
    };
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !observed.load(Ordering::SeqCst) {
        assert!(std::time::Instant::now() < deadline, "cancel never delivered");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn overload_sheds_non_critical_tasks() {
    common::init_test_logging();
    let rt = weft::RuntimeBuilder::new()
        .worker_threads(1)
        .max_queued_tasks(0)
        .build()
        .unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let mut shed = {
        let ran = Arc::clone(&ran);
        rt.spawn(move |_cx| async move {
            ran.store(true, Ordering::SeqCst);
        })
    };
    match shed.get_blocking() {
        Err(TaskError::Cancelled(reason)) => assert_eq!(reason.kind(), CancelKind::Overload),
        other => panic!("expected overload cancellation, got {other:?}"),
    }
    assert!(!ran.load(Ordering::SeqCst));

    // Critical tasks are exempt from shedding.
    let mut critical = rt.spawn_critical(|_cx| async move { 7 });
    assert_eq!(critical.get_blocking().unwrap(), 7);
}

#[test]
fn stack_size_is_the_configured_worker_stack() {
    common::init_test_logging();
    let stack = 512 * 1024;
    let rt = weft::RuntimeBuilder::new()
        .worker_threads(1)
        .worker_stack_size(stack)
        .build()
        .unwrap();
    rt.block_on(move |cx| async move {
        assert_eq!(cx.stack_size(), stack);
        assert_eq!(weft::current_task::stack_size(), stack);
    });
}

#[test]
#[should_panic(expected = "boom in block_on")]
fn block_on_propagates_panic() {
    let rt = common::runtime_with_workers(2);
    rt.block_on(|_cx| async move {
        panic!("boom in block_on");
    });
}

#[test]
fn block_on_returns_value() {
    let rt = common::runtime_with_workers(2);
    let value = rt.block_on(|cx| async move {
        let mut sub = cx.spawn(|_cx| async move { 20 + 22 });
        sub.get(&cx).await.unwrap()
    });
    assert_eq!(value, 42);
}
