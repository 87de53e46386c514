//! Global FIFO run queue shared by all worker threads.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::types::TaskId;

/// FIFO queue of runnable task ids.
///
/// Workers block on [`RunQueue::pop_blocking`] until a task becomes
/// runnable or the queue is shut down. A task id appears in the queue
/// at most once; the schedule-state machine on the task context
/// guarantees exactly-once enqueue per wakeup.
pub(crate) struct RunQueue {
    inner: Mutex<QueueInner>,
    ready: Condvar,
}

struct QueueInner {
    queue: VecDeque<TaskId>,
    shutdown: bool,
}

impl RunQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Appends a runnable task. Ignored after shutdown; workers are
    /// already draining out and the runtime drop path reaps the task.
    pub(crate) fn push(&self, id: TaskId) {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return;
        }
        inner.queue.push_back(id);
        drop(inner);
        self.ready.notify_one();
    }

    /// Blocks until a task is available. Returns `None` once the queue
    /// has been shut down and fully drained.
    pub(crate) fn pop_blocking(&self) -> Option<TaskId> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(id) = inner.queue.pop_front() {
                return Some(id);
            }
            if inner.shutdown {
                return None;
            }
            self.ready.wait(&mut inner);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub(crate) fn shutdown_now(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        drop(inner);
        self.ready.notify_all();
    }
}
