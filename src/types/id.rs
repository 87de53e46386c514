//! Task identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier of a task within a process.
///
/// Ids are allocated monotonically and never reused, so a stale id cannot
/// alias a later task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocates a fresh task id.
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Creates a task id from a raw value (tests only).
    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert!(b > a);
        assert_ne!(a, b);
    }

    #[test]
    fn display_format() {
        assert_eq!(TaskId::from_raw(7).to_string(), "task-7");
    }
}
