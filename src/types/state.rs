//! Task lifecycle states.

use std::fmt;

/// Execution state of a task.
///
/// Transitions are monotonic except for the `Suspended → Queued → Running`
/// cycle a live task goes through at every suspension point:
///
/// ```text
/// New → Queued → Running ⇄ Suspended
///                   │
///                   ├─→ Completed
///                   └─→ Cancelled
/// ```
///
/// `Cancelled` and `Completed` are terminal. A task cancelled before it ever
/// ran goes `Queued → Cancelled` directly, without executing its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Created but not yet handed to the scheduler.
    New,
    /// In the run queue, waiting for a worker.
    Queued,
    /// Being polled by a worker right now.
    Running,
    /// Parked at a suspension point, off the run queue.
    Suspended,
    /// Terminal: unwound by cancellation; the body did not run to completion.
    Cancelled,
    /// Terminal: the body ran to completion (successfully or with a panic).
    Completed,
}

impl TaskState {
    /// Returns true for the terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        write!(f, "{name}")
    }
}
