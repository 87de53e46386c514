//! Deadline tracking on a dedicated driver thread.
//!
//! Timed waits register an `(Instant, Waker)` pair here. A single
//! driver thread sleeps until the earliest registered deadline and
//! fires the expired wakers. Firing is edge triggered: a stale entry
//! whose task already finished wakes into a no-op.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::task::Waker;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

pub(crate) struct Timer {
    inner: Mutex<TimerInner>,
    tick: Condvar,
}

struct TimerInner {
    heap: BinaryHeap<TimerEntry>,
    next_generation: u64,
    shutdown: bool,
}

struct TimerEntry {
    deadline: Instant,
    generation: u64,
    waker: Waker,
}

// Min-heap over (deadline, generation); generation breaks ties so
// equal deadlines fire in registration order.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl Timer {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(TimerInner {
                heap: BinaryHeap::new(),
                next_generation: 0,
                shutdown: false,
            }),
            tick: Condvar::new(),
        }
    }

    /// Registers `waker` to be woken once `deadline` has passed.
    pub(crate) fn register(&self, deadline: Instant, waker: Waker) {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return;
        }
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.heap.push(TimerEntry {
            deadline,
            generation,
            waker,
        });
        drop(inner);
        self.tick.notify_one();
    }

    pub(crate) fn shutdown_now(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        inner.heap.clear();
        drop(inner);
        self.tick.notify_all();
    }

    /// Driver loop. Runs until [`Timer::shutdown_now`] is called.
    pub(crate) fn run(&self) {
        let mut inner = self.inner.lock();
        loop {
            if inner.shutdown {
                return;
            }
            let now = Instant::now();
            let mut expired: Vec<Waker> = Vec::new();
            while inner.heap.peek().is_some_and(|entry| entry.deadline <= now) {
                if let Some(entry) = inner.heap.pop() {
                    expired.push(entry.waker);
                }
            }
            if !expired.is_empty() {
                drop(inner);
                for waker in expired {
                    waker.wake();
                }
                inner = self.inner.lock();
                continue;
            }
            match inner.heap.peek().map(|entry| entry.deadline) {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(now);
                    self.tick.wait_for(&mut inner, timeout);
                }
                None => self.tick.wait(&mut inner),
            }
        }
    }
}
