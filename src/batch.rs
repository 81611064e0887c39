use crate::{
    job::{Job, JobHandle},
    manager::JobManager,
};
use crossbeam_channel::{Receiver, Sender};
use std::{borrow::Cow, time::Duration};

type CompletionCallback = Box<dyn FnOnce() + Send>;

/// Collects jobs for one frame or batch of work and starts them together.
///
/// Completion callbacks registered through
/// [`add_job_with_callback`](Self::add_job_with_callback) are not run on the
/// worker: they travel back over a channel and run on whichever thread calls
/// [`complete_callbacks`](Self::complete_callbacks), typically the thread
/// that owns the batch.
///
/// Jobs added to a batch are manager-owned; the returned handles are for
/// chaining [`add_wait`](Job::add_wait) edges and polling, not for re-running.
#[derive(Debug)]
pub struct JobBatch<'m> {
    manager: &'m JobManager,
    pending: Vec<JobHandle>,
    callbacks_tx: Sender<CompletionCallback>,
    callbacks_rx: Receiver<CompletionCallback>,
}

impl<'m> JobBatch<'m> {
    /// Creates an empty batch feeding `manager`.
    #[must_use]
    pub fn new(manager: &'m JobManager) -> Self {
        let (callbacks_tx, callbacks_rx) = crossbeam_channel::unbounded();
        Self {
            manager,
            pending: Vec::new(),
            callbacks_tx,
            callbacks_rx,
        }
    }

    /// Manager the batch submits to.
    #[must_use]
    pub fn manager(&self) -> &'m JobManager {
        self.manager
    }

    /// Number of jobs added since the last [`submit`](Self::submit).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Adds a job running `f`.
    pub fn add_job(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        f: impl FnMut() + Send + 'static,
    ) -> JobHandle {
        self.push(Job::from_fn(name, f))
    }

    /// Adds a job calling `f(i)` for every `i` in `0..count`.
    pub fn add_parallel(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        count: usize,
        f: impl FnMut(usize) + Send + 'static,
    ) -> JobHandle {
        self.push(Job::parallel(name, count, f))
    }

    /// Adds a job running `f`, then queues `on_complete` for the next
    /// [`complete_callbacks`](Self::complete_callbacks).
    pub fn add_job_with_callback(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        f: impl FnOnce() + Send + 'static,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> JobHandle {
        let tx = self.callbacks_tx.clone();
        let mut work = Some((f, on_complete));
        self.push(Job::from_fn(name, move || {
            let Some((f, on_complete)) = work.take() else {
                return;
            };
            f();
            if tx.send(Box::new(on_complete)).is_err() {
                tracing::debug!("job batch dropped before its completion callback arrived");
            }
        }))
    }

    /// Starts every pending job. Returns how many were started.
    ///
    /// # Panics
    /// If the manager's queue overflows.
    pub fn submit(&mut self) -> usize {
        let count = self.pending.len();
        for job in self.pending.drain(..) {
            self.manager.start_job(&job);
        }
        tracing::trace!(manager = self.manager.name(), count, "job batch submitted");
        count
    }

    /// Waits on the manager; see [`JobManager::wait`].
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.manager.wait(timeout)
    }

    /// Runs every completion callback delivered so far on the calling
    /// thread. Returns how many ran.
    pub fn complete_callbacks(&self) -> usize {
        self.callbacks_rx
            .try_iter()
            .map(|callback| callback())
            .count()
    }

    fn push(&mut self, job: JobHandle) -> JobHandle {
        job.delete_on_finish();
        self.pending.push(job.clone());
        job
    }
}

impl Drop for JobBatch<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(
                manager = self.manager.name(),
                count = self.pending.len(),
                "job batch dropped with unsubmitted jobs"
            );
        }
    }
}
