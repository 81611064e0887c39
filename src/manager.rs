mod dispatch;
mod worker;

use crate::{
    config::{ConfigError, JobManagerConfig},
    future::{Future, FutureError, Promise},
    job::{Job, JobHandle},
    queue::BoundedQueue,
    signal::Signal,
    types::ManagerId,
    utils::RangeChunks,
};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::{
    borrow::Cow,
    io,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};
use thiserror::Error;

/// Error returned by [`JobManager::new`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobManagerError {
    /// The config failed validation.
    #[error("invalid job manager config: {0}")]
    Config(#[from] ConfigError),
    /// The OS refused to create a worker thread.
    #[error("failed to spawn worker {index} of job manager '{name}'")]
    Spawn {
        /// Manager name.
        name: String,
        /// Index of the worker that failed to start.
        index: usize,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// Owns a fixed pool of worker threads and one bounded queue of runnable
/// jobs.
///
/// A job enters the queue only once its dependency counter reaches zero.
/// Each worker sleeps until woken, claims one job, runs it, releases the
/// job's dependents (which may belong to other managers) and wakes a sibling
/// if more work is queued.
///
/// Dropping the manager stops and joins every worker. Jobs still queued at
/// that point are dropped without running.
#[must_use]
#[derive(Debug)]
pub struct JobManager {
    shared: Arc<ManagerShared>,
    workers: Vec<JoinHandle<()>>,
}

/// State shared between a [`JobManager`], its workers and every job started
/// on it.
#[derive(derive_more::Debug)]
pub(crate) struct ManagerShared {
    id: ManagerId,
    name: String,
    num_threads: usize,
    queue: BoundedQueue<JobHandle>,
    /// Jobs pushed into the queue and not yet claimed by a worker.
    available: AtomicUsize,
    pool: Mutex<PoolState>,
    #[debug(skip)]
    work_cond: Condvar,
    #[debug(skip)]
    idle_cond: Condvar,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Wake-ups handed out by `submit` and not yet consumed by a worker.
    wake_tokens: usize,
    /// Workers between claiming a wake-up and finishing their unit of work.
    busy: usize,
    shutdown: bool,
}

impl JobManager {
    /// Validates `config`, builds the queue and spawns the workers.
    ///
    /// # Errors
    /// If the config is invalid or a worker thread can't be spawned. Workers
    /// spawned before the failure are stopped again.
    pub fn new(config: JobManagerConfig) -> Result<Self, JobManagerError> {
        config.validate()?;
        let num_threads = config.effective_threads();
        if num_threads < config.num_threads {
            tracing::warn!(
                manager = %config.name,
                requested = config.num_threads,
                num_threads,
                "job thread count clamped"
            );
        }
        let queue = BoundedQueue::new(config.queue_capacity).map_err(ConfigError::from)?;
        let shared = Arc::new(ManagerShared {
            id: ManagerId::next(),
            name: config.name,
            num_threads,
            queue,
            available: AtomicUsize::new(0),
            pool: Mutex::new(PoolState::default()),
            work_cond: Condvar::new(),
            idle_cond: Condvar::new(),
        });
        let mut manager = Self {
            shared,
            workers: Vec::with_capacity(num_threads),
        };
        for index in 0..num_threads {
            let shared = manager.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", shared.name))
                .spawn(move || worker::run(&shared, index))
                .map_err(|source| JobManagerError::Spawn {
                    name: manager.shared.name.clone(),
                    index,
                    source,
                })?;
            manager.workers.push(handle);
        }
        tracing::debug!(
            manager = %manager.shared.name,
            id = %manager.shared.id,
            num_threads,
            queue_capacity = manager.shared.queue.capacity(),
            "job manager started"
        );
        Ok(manager)
    }

    /// Shorthand for [`JobManager::new`] with an explicit name, thread count
    /// and queue capacity.
    ///
    /// # Errors
    /// See [`JobManager::new`].
    pub fn with_threads(
        name: impl Into<String>,
        num_threads: usize,
        queue_capacity: usize,
    ) -> Result<Self, JobManagerError> {
        Self::new(
            JobManagerConfig::new(name)
                .with_threads(num_threads)
                .with_queue_capacity(queue_capacity),
        )
    }

    /// Process-unique id of this manager.
    #[must_use]
    pub fn id(&self) -> ManagerId {
        self.shared.id
    }

    /// Name given at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of worker threads.
    #[must_use]
    pub fn job_threads_count(&self) -> usize {
        self.shared.num_threads
    }

    /// Capacity of the runnable-job queue.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Registers `job` with this manager.
    ///
    /// If the job waits on nothing it is queued and a worker is woken right
    /// away; otherwise it stays dormant until its last dependency finishes.
    ///
    /// # Panics
    /// If the job is not in [`JobPhase::Init`](crate::job::JobPhase::Init),
    /// or if it becomes runnable while the queue is full.
    pub fn start_job(&self, job: &JobHandle) {
        job.mark_started(self.shared.clone());
        if job.release_wait() {
            self.shared.push_runnable(job.clone());
            self.shared.submit(1);
        } else {
            tracing::trace!(
                manager = %self.shared.name,
                job = job.name(),
                pending = job.pending_waits(),
                "job deferred until its dependencies finish"
            );
        }
    }

    /// Re-initializes `job` and starts it.
    ///
    /// # Panics
    /// See [`Job::init_job`] and [`JobManager::start_job`].
    pub fn init_start_job(&self, job: &JobHandle) {
        job.init_job();
        self.start_job(job);
    }

    /// Wakes up to `n` idle workers to poll the queue.
    pub fn submit(&self, n: usize) {
        self.shared.submit(n);
    }

    /// Whether every worker is idle and no job is queued.
    ///
    /// A snapshot for polling; jobs may be started concurrently.
    #[must_use]
    pub fn all_jobs_completed(&self) -> bool {
        let pool = self.shared.lock_pool();
        self.shared.is_idle(&pool)
    }

    /// Blocks until every worker is idle and no job is queued, or until
    /// `timeout` elapses (`None` waits forever). Returns whether the idle
    /// state was reached.
    ///
    /// Dormant jobs whose dependencies are unfinished don't count, and
    /// nothing stops other threads from queueing new work right after this
    /// returns.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let pool = self.shared.lock_pool();
        let busy = |pool: &mut PoolState| !self.shared.is_idle(pool);
        match timeout {
            None => {
                let _pool = self
                    .shared
                    .idle_cond
                    .wait_while(pool, busy)
                    .unwrap_or_else(PoisonError::into_inner);
                true
            }
            Some(timeout) => {
                let (pool, _) = self
                    .shared
                    .idle_cond
                    .wait_timeout_while(pool, timeout, busy)
                    .unwrap_or_else(PoisonError::into_inner);
                self.shared.is_idle(&pool)
            }
        }
    }

    /// Starts a job that runs `f` once and resolves the returned future with
    /// its outcome.
    pub fn start_with_future<T, F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        f: F,
    ) -> Future<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T, FutureError> + Send + 'static,
    {
        let promise = Promise::new();
        let future = promise.create_future();
        let mut f = Some(f);
        let job = Job::from_fn(name, move || {
            let f = f.take().expect("JobManager::start_with_future: [1]");
            match f() {
                Ok(value) => promise.set_result(value),
                Err(FutureError { code, message }) => promise.set_error(code, message),
            }
        });
        job.delete_on_finish();
        self.start_job(&job);
        future
    }

    /// Runs `f(i)` for every `i` in `0..len`, spread over jobs covering at
    /// most `batch` consecutive indices each.
    ///
    /// Returns a join job, with a completion signal, that reaches
    /// [`JobPhase::Done`](crate::job::JobPhase::Done) once every range has
    /// been processed. Other jobs may [`add_wait`](Job::add_wait) on it.
    ///
    /// # Panics
    /// If `batch` is zero, or if the queue overflows.
    pub fn parallel_for<F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        len: usize,
        batch: usize,
        f: F,
    ) -> JobHandle
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let name = name.into();
        let join = Job::from_fn(format!("{name}:join"), || {});
        join.set_signal(Some(Arc::new(Signal::new())));
        let f = Arc::new(f);
        let ranges: Vec<_> = (0..len)
            .split_into_chunks(batch)
            .map(|range| {
                let f = f.clone();
                let job = Job::from_fn(name.clone(), move || range.clone().for_each(&*f));
                join.add_wait(&job);
                job
            })
            .collect();
        self.start_job(&join);
        for job in &ranges {
            job.delete_on_finish();
            self.start_job(job);
        }
        join
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shared.lock_pool().shutdown = true;
        self.shared.work_cond.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!(manager = %self.shared.name, "job worker panicked");
            }
        }
        let mut dropped = 0usize;
        while let Some(job) = self.shared.queue.dequeue() {
            self.shared.available.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(
                manager = %self.shared.name,
                job = job.name(),
                "queued job dropped at shutdown"
            );
            dropped += 1;
        }
        tracing::debug!(manager = %self.shared.name, dropped, "job manager stopped");
    }
}

impl ManagerShared {
    pub(crate) fn id(&self) -> ManagerId {
        self.id
    }

    /// Wakes up to `n` workers. Pending wake-ups never exceed the number of
    /// workers; a worker that finds more work after its job re-submits.
    pub(crate) fn submit(&self, n: usize) {
        if n == 0 {
            return;
        }
        let granted = {
            let mut pool = self.lock_pool();
            let room = self.num_threads.saturating_sub(pool.wake_tokens);
            let granted = n.min(room);
            pool.wake_tokens += granted;
            granted
        };
        if granted >= self.num_threads {
            self.work_cond.notify_all();
        } else {
            for _ in 0..granted {
                self.work_cond.notify_one();
            }
        }
    }

    fn is_idle(&self, pool: &PoolState) -> bool {
        pool.busy == 0 && self.available.load(Ordering::Acquire) == 0
    }

    fn lock_pool(&self) -> MutexGuard<'_, PoolState> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
