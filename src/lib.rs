//! Weft: a cooperative task engine on a worker-thread pool.
//!
//! # Overview
//!
//! Weft runs lightweight tasks on a small pool of worker threads. Tasks
//! suspend at explicit wait points instead of blocking their thread, and
//! cancellation is a first-class cooperative protocol: a request marks the
//! task and wakes its cancellable waits, and the task decides when to stop
//! by reaching a cancellation point.
//!
//! # Core Guarantees
//!
//! - **Cooperative cancellation**: a cancel request never preempts running
//!   code; it interrupts cancellable waits and takes effect at the next
//!   cancellation point, unwinding with destructors
//! - **Cancellation masking**: a blocker defers delivery without losing the
//!   request
//! - **Early-cancel drop**: a task cancelled before its first run never
//!   executes its body, but its captures are still destroyed in task context
//! - **FIFO mutex**: unlock hands the lock to the oldest waiter; acquisition
//!   is never interrupted by cancellation
//! - **Deterministic wait outcomes**: a condition-variable wait reports
//!   notification, timeout, or cancellation by whichever claimed the waiter
//!   first
//!
//! # Module Structure
//!
//! - [`types`]: Core types (task ids, lifecycle states, cancel reasons)
//! - [`runtime`]: The worker pool, task handles, and configuration
//! - [`cx`]: Task capability context and the ambient current-task view
//! - [`sync`]: Task-aware mutex and condition variable
//! - [`time`]: Timed suspension
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```
//! use weft::RuntimeBuilder;
//!
//! let rt = RuntimeBuilder::new().worker_threads(2).build().unwrap();
//! let sum = rt.block_on(|cx| async move {
//!     let mut sub = cx.spawn(|_cx| async move { 20 + 22 });
//!     sub.get(&cx).await.unwrap()
//! });
//! assert_eq!(sum, 42);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]

pub mod cx;
pub mod error;
pub mod runtime;
pub mod sync;
pub mod time;
pub mod types;

pub use cx::{current_task, Cx};
pub use error::{Cancelled, PanicPayload, TaskError, WaitInterrupted};
pub use runtime::{BuildError, Runtime, RuntimeBuilder, RuntimeConfig, TaskHandle};
pub use sync::{ConditionVariable, CvStatus, Mutex, MutexGuard};
pub use types::{CancelKind, CancelReason, TaskId, TaskState};
