//! Task-aware synchronization primitives.
//!
//! These suspend the task instead of blocking the worker thread, and
//! follow the cancellation protocol: condition-variable waits are
//! cancellation points, mutex acquisition deliberately is not.

mod condvar;
mod mutex;

pub use condvar::{ConditionVariable, CvStatus};
pub use mutex::{Lock, Mutex, MutexGuard};
