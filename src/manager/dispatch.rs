use crate::{
    job::{JobHandle, Ownership},
    manager::ManagerShared,
    types::{IndexMap, ManagerId},
};
use core::sync::atomic::Ordering;
use std::sync::Arc;

impl ManagerShared {
    /// Pushes a job whose dependency counter just reached zero.
    ///
    /// Does not wake anyone; callers follow up with [`submit`](Self::submit),
    /// batching wake-ups where they can.
    ///
    /// # Panics
    /// If the queue is full. The workload outgrew the configured capacity and
    /// this layer has no way to recover.
    pub(crate) fn push_runnable(&self, job: JobHandle) {
        tracing::trace!(manager = %self.name, job = job.name(), "queueing job");
        self.available.fetch_add(1, Ordering::AcqRel);
        if let Err(job) = self.queue.enqueue(job) {
            self.available.fetch_sub(1, Ordering::AcqRel);
            tracing::error!(
                manager = %self.name,
                job = job.name(),
                capacity = self.queue.capacity(),
                "job queue overflow"
            );
            panic!(
                "JobManager: queue of '{}' is full (capacity {}) while dispatching job '{}'",
                self.name,
                self.queue.capacity(),
                job.name()
            );
        }
    }

    /// Runs a claimed job on the current worker and propagates its
    /// completion.
    ///
    /// Dependents whose counter reaches zero are pushed into the queue of the
    /// manager they were started on, which is not necessarily this one.
    /// Wake-ups are issued once per distinct manager.
    pub(super) fn execute_job(&self, job: JobHandle) {
        let _span = tracing::trace_span!("job", manager = %self.name, name = job.name()).entered();
        job.run();

        let finished = job.finish();
        if let Some(signal) = &finished.signal {
            signal.raise();
        }

        let mut ready: IndexMap<ManagerId, (Arc<ManagerShared>, usize)> = IndexMap::default();
        for dependent in finished.dependents {
            if !dependent.release_wait() {
                continue;
            }
            let owner = dependent.owner();
            owner.push_runnable(dependent);
            ready.entry(owner.id()).or_insert((owner, 0)).1 += 1;
        }
        for (owner, count) in ready.into_values() {
            owner.submit(count);
        }

        if finished.ownership == Ownership::Manager {
            job.release();
        }
        tracing::trace!("job done");
    }
}
