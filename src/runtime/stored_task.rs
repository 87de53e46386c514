//! Type-erased task payload owned by the runtime's task table.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::cx::Cx;

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type TaskBody = Box<dyn FnOnce(Cx) -> BoxFuture + Send + 'static>;

enum Payload {
    /// Body closure has not run yet. Dropping this variant before the
    /// first poll destroys the user's captures without ever running
    /// the body, which is what early cancellation relies on.
    NotStarted(TaskBody),
    Started(BoxFuture),
    /// Placeholder during the not-started to started transition.
    Starting,
}

/// A spawned task's payload, either the unstarted body closure or the
/// future it produced. Lives in the task table while the task is not
/// being polled; a worker takes it out for the duration of one poll.
pub(crate) struct StoredTask {
    payload: Payload,
}

impl StoredTask {
    pub(crate) fn new(body: TaskBody) -> Self {
        Self {
            payload: Payload::NotStarted(body),
        }
    }

    /// Polls the task, instantiating the body future on the first call.
    /// Must run with the task installed as the current one.
    pub(crate) fn poll(&mut self, task_cx: &Cx, poll_cx: &mut Context<'_>) -> Poll<()> {
        if matches!(self.payload, Payload::NotStarted(_)) {
            let Payload::NotStarted(body) =
                std::mem::replace(&mut self.payload, Payload::Starting)
            else {
                unreachable!()
            };
            self.payload = Payload::Started(body(task_cx.clone()));
        }
        match &mut self.payload {
            Payload::Started(future) => future.as_mut().poll(poll_cx),
            Payload::NotStarted(_) | Payload::Starting => unreachable!(),
        }
    }
}
