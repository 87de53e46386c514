//! Worker-thread runtime: spawning, the task table, and shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::panic::resume_unwind;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cx::Cx;
use crate::error::TaskError;
use crate::types::{CancelReason, TaskId};

mod config;
mod context;
mod handle;
mod queue;
mod stored_task;
mod timer;
mod worker;

pub use config::RuntimeConfig;
pub use handle::{TaskHandle, WaitFinished};

pub(crate) use context::TaskContext;

use handle::ResultSlot;
use queue::RunQueue;
use stored_task::{BoxFuture, StoredTask};
use timer::Timer;

/// Error from [`RuntimeBuilder::build`].
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Spawning a worker or timer thread failed.
    #[error("failed to spawn runtime thread")]
    Thread(#[from] io::Error),
}

struct TaskEntry {
    context: Arc<TaskContext>,
    /// `None` while a worker holds the payload for a poll.
    payload: Option<StoredTask>,
}

/// State shared between workers, handles, and task contexts.
pub(crate) struct RuntimeShared {
    config: RuntimeConfig,
    queue: RunQueue,
    timer: Timer,
    table: Mutex<HashMap<TaskId, TaskEntry>>,
}

impl RuntimeShared {
    pub(crate) fn queue(&self) -> &RunQueue {
        &self.queue
    }

    pub(crate) fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Takes a task's payload for one poll. `None` if the task is
    /// gone or its payload is already held elsewhere.
    pub(crate) fn take_payload(&self, id: TaskId) -> Option<(Arc<TaskContext>, StoredTask)> {
        let mut table = self.table.lock();
        let entry = table.get_mut(&id)?;
        let stored = entry.payload.take()?;
        Some((entry.context.clone(), stored))
    }

    /// Returns a suspended task's payload to the table.
    pub(crate) fn store_payload(&self, id: TaskId, stored: StoredTask) {
        if let Some(entry) = self.table.lock().get_mut(&id) {
            entry.payload = Some(stored);
        }
    }

    pub(crate) fn remove_task(&self, id: TaskId) {
        self.table.lock().remove(&id);
    }
}

/// Spawns a task onto `shared`, returning its handle.
pub(crate) fn spawn_task<F, Fut, T>(
    shared: &Arc<RuntimeShared>,
    critical: bool,
    body: F,
) -> TaskHandle<T>
where
    F: FnOnce(Cx) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let id = TaskId::next();
    let context = TaskContext::new(
        id,
        critical,
        shared.config.worker_stack_size,
        Arc::downgrade(shared),
    );

    let result: ResultSlot<T> = Arc::new(Mutex::new(None));
    let slot = result.clone();
    let stored = StoredTask::new(Box::new(move |cx: Cx| -> BoxFuture {
        Box::pin(async move {
            let value = body(cx).await;
            *slot.lock() = Some(value);
        })
    }));

    // Overload shedding: a non-critical task spawned over the queue
    // limit is cancelled up front. It still goes through the queue so
    // its captures are dropped in task context by a worker.
    if !critical {
        if let Some(limit) = shared.config.max_queued_tasks {
            if shared.queue.len() >= limit {
                warn!(task = %id, limit, "run queue over limit, shedding task");
                context.preset_cancel(CancelReason::overload());
            }
        }
    }

    debug!(task = %id, critical, "task spawned");
    shared.table.lock().insert(
        id,
        TaskEntry {
            context: context.clone(),
            payload: Some(stored),
        },
    );
    context.mark_spawned();
    shared.queue.push(id);
    TaskHandle::new(context, result)
}

/// The task engine: a worker-thread pool, a run queue, and a timer.
///
/// Dropping the runtime shuts it down: queued and suspended tasks are
/// cancelled and their state is dropped in task context, then worker
/// threads are joined.
pub struct Runtime {
    shared: Arc<RuntimeShared>,
    workers: Vec<JoinHandle<()>>,
    timer_driver: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Runtime with default configuration.
    ///
    /// # Errors
    ///
    /// Fails if a runtime thread cannot be spawned.
    pub fn new() -> Result<Self, BuildError> {
        RuntimeBuilder::new().build()
    }

    /// The configuration this runtime was built with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Spawns a task. The body receives the task's own [`Cx`].
    pub fn spawn<F, Fut, T>(&self, body: F) -> TaskHandle<T>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        spawn_task(&self.shared, false, body)
    }

    /// Spawns a critical task: never shed on overload and guaranteed
    /// to start even if cancelled beforehand.
    pub fn spawn_critical<F, Fut, T>(&self, body: F) -> TaskHandle<T>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        spawn_task(&self.shared, true, body)
    }

    /// Runs `body` as a critical task and blocks the calling thread
    /// until it finishes, returning its output.
    ///
    /// # Panics
    ///
    /// Propagates a panic from the task body.
    pub fn block_on<F, Fut, T>(&self, body: F) -> T
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut handle = self.spawn_critical(body);
        match handle.get_blocking() {
            Ok(value) => value,
            Err(TaskError::Panicked(panic)) => resume_unwind(panic.into_any()),
            Err(error) => panic!("block_on task failed: {error}"),
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        debug!("runtime shutting down");
        self.shared.queue.shutdown_now();
        self.shared.timer.shutdown_now();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(driver) = self.timer_driver.take() {
            let _ = driver.join();
        }
        // Reap tasks that never got to finish. Their payloads are
        // dropped with the task installed as current, preserving the
        // destructor-in-task-context guarantee at shutdown.
        let entries: Vec<TaskEntry> = {
            let mut table = self.shared.table.lock();
            table.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            if let Some(payload) = entry.payload {
                let guard = Cx::set_current(Some(Cx::from_context(entry.context.clone())));
                entry.context.preset_cancel(CancelReason::shutdown());
                drop(payload);
                drop(guard);
            }
            if !entry.context.state().is_terminal() {
                entry.context.complete_cancelled(CancelReason::shutdown());
            }
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("worker_threads", &self.shared.config.worker_threads)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Runtime`].
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Builder over the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Builder over an existing configuration.
    #[must_use]
    pub fn from_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Number of worker threads. Clamped to at least one.
    #[must_use]
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count.max(1);
        self
    }

    /// Stack size of each worker thread, in bytes.
    #[must_use]
    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.config.worker_stack_size = bytes;
        self
    }

    /// Run-queue length beyond which non-critical spawns are shed.
    #[must_use]
    pub fn max_queued_tasks(mut self, limit: usize) -> Self {
        self.config.max_queued_tasks = Some(limit);
        self
    }

    /// Name prefix for worker and timer threads.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Starts the worker and timer threads.
    ///
    /// # Errors
    ///
    /// Fails if a runtime thread cannot be spawned.
    pub fn build(self) -> Result<Runtime, BuildError> {
        let shared = Arc::new(RuntimeShared {
            config: self.config,
            queue: RunQueue::new(),
            timer: Timer::new(),
            table: Mutex::new(HashMap::new()),
        });

        let timer_driver = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name(format!("{}-timer", shared.config.thread_name_prefix))
                .spawn(move || shared.timer.run())?
        };

        let mut workers = Vec::with_capacity(shared.config.worker_threads);
        for index in 0..shared.config.worker_threads {
            let spawned = {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("{}-{index}", shared.config.thread_name_prefix))
                    .stack_size(shared.config.worker_stack_size)
                    .spawn(move || worker::run(&shared, index))
            };
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(error) => {
                    // Tear down what already started before bailing.
                    shared.queue.shutdown_now();
                    shared.timer.shutdown_now();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    let _ = timer_driver.join();
                    return Err(error.into());
                }
            }
        }

        debug!(
            worker_threads = shared.config.worker_threads,
            "runtime started"
        );
        Ok(Runtime {
            shared,
            workers,
            timer_driver: Some(timer_driver),
        })
    }
}
