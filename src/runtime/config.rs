//! Runtime configuration.

use serde::{Deserialize, Serialize};

const DEFAULT_WORKER_THREADS: usize = 4;
const DEFAULT_WORKER_STACK_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_THREAD_NAME_PREFIX: &str = "weft-worker";

/// Tunables for a [`Runtime`](crate::Runtime).
///
/// Deserializable so deployments can load it from a config file;
/// [`RuntimeConfig::from_env`] offers per-field environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads polling tasks.
    pub worker_threads: usize,
    /// Stack size of each worker thread, in bytes.
    pub worker_stack_size: usize,
    /// Overload limit: a non-critical spawn arriving while the run
    /// queue holds at least this many tasks is cancelled before it
    /// starts. `None` disables shedding.
    pub max_queued_tasks: Option<usize>,
    /// Worker threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            worker_stack_size: DEFAULT_WORKER_STACK_SIZE,
            max_queued_tasks: None,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults with `WEFT_WORKER_THREADS`, `WEFT_WORKER_STACK_SIZE`,
    /// `WEFT_MAX_QUEUED_TASKS` and `WEFT_THREAD_NAME_PREFIX` applied
    /// on top. Unparsable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(threads) = env_parse("WEFT_WORKER_THREADS") {
            config.worker_threads = threads;
        }
        if let Some(stack) = env_parse("WEFT_WORKER_STACK_SIZE") {
            config.worker_stack_size = stack;
        }
        if let Some(limit) = env_parse("WEFT_MAX_QUEUED_TASKS") {
            config.max_queued_tasks = Some(limit);
        }
        if let Ok(prefix) = std::env::var("WEFT_THREAD_NAME_PREFIX") {
            if !prefix.is_empty() {
                config.thread_name_prefix = prefix;
            }
        }
        config
    }
}

fn env_parse(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse().ok()
}
