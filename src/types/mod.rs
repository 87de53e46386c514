//! Core types: task identifiers, lifecycle states, cancellation reasons.

mod cancel;
mod id;
mod state;

pub use cancel::{CancelKind, CancelReason};
pub use id::TaskId;
pub use state::TaskState;
