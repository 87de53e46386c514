#![allow(dead_code)]
//! Shared integration test utilities.

use std::sync::Once;
use std::time::Duration;

use weft::{Cx, Runtime, RuntimeBuilder};

static INIT_LOGGING: Once = Once::new();

/// Initializes test logging once per process. Controlled by
/// `RUST_LOG`; silent by default.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Runtime with a single worker. Tasks can only interleave at
/// suspension points, which many scenarios rely on for determinism.
pub fn single_worker_runtime() -> Runtime {
    init_test_logging();
    RuntimeBuilder::new()
        .worker_threads(1)
        .thread_name_prefix("weft-test")
        .build()
        .expect("failed to build runtime")
}

/// Runtime with the given number of workers.
pub fn runtime_with_workers(count: usize) -> Runtime {
    init_test_logging();
    RuntimeBuilder::new()
        .worker_threads(count)
        .thread_name_prefix("weft-test")
        .build()
        .expect("failed to build runtime")
}

/// Yields until `cond` holds; panics if it never does.
pub async fn spin_until(cx: &Cx, mut cond: impl FnMut() -> bool) {
    for _ in 0..100_000 {
        if cond() {
            return;
        }
        cx.yield_now().await;
    }
    panic!("condition not reached");
}

/// A short pause, long enough for background machinery to act.
pub const SHORT_WAIT: Duration = Duration::from_millis(50);

/// A sleep no test should ever actually sit out in full.
pub const LONG_SLEEP: Duration = Duration::from_secs(10);
