use crate::manager::ManagerShared;
use core::sync::atomic::Ordering;
use std::{process, sync::PoisonError, thread};

/// Aborts the process if dropped while the worker unwinds.
///
/// Job bodies run without containment: a panic there, or a queue overflow
/// while releasing dependents, leaves the dependency graph half-propagated.
struct AbortOnUnwind<'a> {
    manager: &'a str,
}

impl Drop for AbortOnUnwind<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!(manager = self.manager, "job worker panicked, aborting");
            process::abort();
        }
    }
}

/// Worker loop: wait for a wake-up, claim one job, run it, pass the wake-up
/// on if more work is queued.
pub(super) fn run(shared: &ManagerShared, index: usize) {
    tracing::debug!(manager = %shared.name, worker = index, "job worker started");
    let _guard = AbortOnUnwind {
        manager: &shared.name,
    };
    while shared.claim_wake() {
        if let Some(job) = shared.queue.dequeue() {
            shared.available.fetch_sub(1, Ordering::AcqRel);
            shared.execute_job(job);
        }
        if shared.available.load(Ordering::Acquire) > 0 {
            shared.submit(1);
        }
        shared.release_busy();
    }
    tracing::debug!(manager = %shared.name, worker = index, "job worker stopped");
}

impl ManagerShared {
    /// Blocks until a wake-up is available or the manager shuts down.
    /// Returns `false` on shutdown; otherwise the caller counts as busy.
    fn claim_wake(&self) -> bool {
        let pool = self.lock_pool();
        let mut pool = self
            .work_cond
            .wait_while(pool, |pool| pool.wake_tokens == 0 && !pool.shutdown)
            .unwrap_or_else(PoisonError::into_inner);
        if pool.shutdown {
            return false;
        }
        pool.wake_tokens -= 1;
        pool.busy += 1;
        true
    }

    fn release_busy(&self) {
        let mut pool = self.lock_pool();
        pool.busy -= 1;
        if self.is_idle(&pool) {
            self.idle_cond.notify_all();
        }
    }
}
