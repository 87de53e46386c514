//! Cancellation reason types.
//!
//! Cancellation is a cooperative protocol, not a silent drop: a request only
//! marks the target task and wakes it if it is parked in a cancellable wait.
//! The types here describe *why* a task was asked to stop.

use std::fmt;

/// The kind of cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    /// Explicit cancellation requested through a task handle.
    UserRequest,
    /// Cancellation because a deadline elapsed.
    Deadline,
    /// Cancellation because the run queue was over its length limit when the
    /// task was spawned. Critical tasks are exempt from this.
    Overload,
    /// Cancellation because the runtime is shutting down.
    Shutdown,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequest => write!(f, "user request"),
            Self::Deadline => write!(f, "deadline"),
            Self::Overload => write!(f, "overload"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The reason a task was cancelled: the kind plus optional static context.
///
/// The first request recorded on a task wins; later requests are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelReason {
    /// The kind of cancellation.
    pub kind: CancelKind,
    /// Optional human-readable message.
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a cancellation reason with the given kind and no message.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a user-requested cancellation reason.
    #[must_use]
    pub const fn user_request() -> Self {
        Self::new(CancelKind::UserRequest)
    }

    /// Creates a user-requested cancellation reason with a message.
    #[must_use]
    pub const fn user_request_with(message: &'static str) -> Self {
        Self {
            kind: CancelKind::UserRequest,
            message: Some(message),
        }
    }

    /// Creates a deadline cancellation reason.
    #[must_use]
    pub const fn deadline() -> Self {
        Self::new(CancelKind::Deadline)
    }

    /// Creates an overload-shedding cancellation reason.
    #[must_use]
    pub const fn overload() -> Self {
        Self::new(CancelKind::Overload)
    }

    /// Creates a runtime-shutdown cancellation reason.
    #[must_use]
    pub const fn shutdown() -> Self {
        Self::new(CancelKind::Shutdown)
    }

    /// Returns the kind of this reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// Returns true if this reason indicates runtime shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.kind, CancelKind::Shutdown)
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::user_request()
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}
