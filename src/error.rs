//! Error types for the task and wait surfaces.
//!
//! Cancellation is not an error inside the runtime; it becomes one only at
//! the boundaries where a caller observes it: a wait that was interrupted by
//! the *waiter's own* cancellation, or a `get` on a task that was unwound.

use crate::types::CancelReason;
use std::any::Any;
use std::fmt;

/// Payload captured from a panicking task body.
///
/// The original payload is preserved so `block_on` can resume the unwind on
/// the caller's thread; a best-effort message is extracted for display.
pub struct PanicPayload {
    message: String,
    payload: Option<Box<dyn Any + Send>>,
}

impl PanicPayload {
    /// Creates a payload with just a message (tests, synthetic failures).
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payload: None,
        }
    }

    /// Captures a payload from `catch_unwind`.
    #[must_use]
    pub fn from_any(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic payload of unknown type".to_owned());
        Self {
            message,
            payload: Some(payload),
        }
    }

    /// Returns the extracted panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Takes the original payload, if it was captured from an unwind.
    #[must_use]
    pub fn into_any(self) -> Box<dyn Any + Send> {
        self.payload
            .unwrap_or_else(|| Box::new(self.message) as Box<dyn Any + Send>)
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicPayload")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Error returned when waiting for another task is interrupted by the
/// waiter's own cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wait interrupted: {reason}")]
pub struct WaitInterrupted {
    /// Why the waiting task was cancelled.
    pub reason: CancelReason,
}

/// Error observed at a cancellation checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled: {reason}")]
pub struct Cancelled {
    /// Why the current task was cancelled.
    pub reason: CancelReason,
}

/// Error returned by [`TaskHandle::get`](crate::runtime::TaskHandle::get).
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The target task was unwound by cancellation; its body did not finish.
    #[error("task was cancelled: {0}")]
    Cancelled(CancelReason),
    /// The target task's body panicked.
    #[error("task panicked: {0}")]
    Panicked(PanicPayload),
    /// The *waiting* task was cancelled before the target finished.
    #[error("wait interrupted: {0}")]
    WaitInterrupted(CancelReason),
}
