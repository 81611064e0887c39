use crate::queue::{self, CapacityError};
use std::thread;
use thiserror::Error;

/// Upper bound on the number of worker threads a single manager spawns.
///
/// Larger requests are clamped.
pub const MAX_JOB_THREADS: usize = 64;

/// Queue capacity used by [`JobManagerConfig::default`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Error returned when a [`JobManagerConfig`] can't be used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Worker threads are named after the manager.
    #[error("job manager name must not be empty")]
    EmptyName,
    /// A manager without workers would never run anything.
    #[error("job manager needs at least one worker thread")]
    NoThreads,
    /// The queue capacity is unusable.
    #[error(transparent)]
    Capacity(#[from] CapacityError),
}

/// Construction parameters of a [`JobManager`](crate::manager::JobManager).
///
/// Caller-supplied; nothing is persisted. With the `serde` feature the
/// config can be read from a collaborator's settings file, missing fields
/// falling back to [`Default`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct JobManagerConfig {
    /// Manager name; worker threads are called `<name>-<index>`.
    pub name: String,
    /// Requested number of worker threads.
    pub num_threads: usize,
    /// Capacity of the runnable-job queue. Must be a power of two.
    pub queue_capacity: usize,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        let num_threads = thread::available_parallelism()
            .map_or(1, |n| n.get())
            .min(MAX_JOB_THREADS);
        Self {
            name: "jobs".to_owned(),
            num_threads,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl JobManagerConfig {
    /// Default config under the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self::default().with_name(name)
    }

    /// Sets the manager name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the requested number of worker threads.
    #[must_use]
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Number of workers actually spawned.
    #[must_use]
    pub fn effective_threads(&self) -> usize {
        self.num_threads.min(MAX_JOB_THREADS)
    }

    /// Checks the config without building anything.
    ///
    /// # Errors
    /// If the name is empty, no thread is requested, or the queue capacity
    /// isn't a power of two >= 2.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.num_threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        queue::check_capacity(self.queue_capacity)?;
        Ok(())
    }
}
