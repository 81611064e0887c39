//! Dependency-aware job manager with a lock-free bounded queue.
//!
//! This crate fans CPU work across fixed pools of worker threads. It:
//! - Queues runnable jobs in a bounded many-producer/many-consumer ring
//!   buffer driven by per-cell sequence numbers, without locks.
//! - Tracks "must finish before" edges between jobs with an atomic
//!   countdown: a job becomes runnable when the last job it waits on
//!   finishes, even if that job ran on a different manager.
//! - Carries results back through a single-assignment [`Promise`] /
//!   [`Future`] pair with blocking waits and callbacks.
//!
//! Key modules:
//! - `queue`: the bounded lock-free queue.
//! - `job`: the `Job` unit of work, its phases and dependency edges.
//! - `manager`: the `JobManager` worker pool, dispatch and completion
//!   propagation.
//! - `future`: `Promise` and `Future`.
//! - `batch`: collect-submit-wait front-end with owner-thread completion
//!   callbacks.
//! - `config`: construction parameters of a manager.
//!
//! Quick start:
//! 1. Build a [`JobManager`] from a [`JobManagerConfig`].
//! 2. Create jobs with [`Job::from_fn`] and chain them with
//!    [`Job::add_wait`].
//! 3. Call [`JobManager::start_job`] on each; order doesn't matter, a job
//!    with unfinished dependencies stays dormant until they are done.
//! 4. Use [`JobManager::wait`] or a job's completion [`Signal`] for coarse
//!    synchronization, or a [`Future`] for results.
//!
//! There is no error containment inside job bodies: a panicking body aborts
//! the process. Bodies that can fail report through a [`Promise`].
//!
//! [`Promise`]: future::Promise
//! [`Future`]: future::Future
//! [`JobManager`]: manager::JobManager
//! [`JobManager::start_job`]: manager::JobManager::start_job
//! [`JobManager::wait`]: manager::JobManager::wait
//! [`JobManagerConfig`]: config::JobManagerConfig
//! [`Job::from_fn`]: job::Job::from_fn
//! [`Job::add_wait`]: job::Job::add_wait
//! [`Signal`]: signal::Signal

/// Front-end for frame/batch style submission.
///
/// Collects jobs, starts them together and delivers completion callbacks to
/// the owning thread instead of running them on workers.
pub mod batch;
/// Construction parameters of a job manager and their validation.
pub mod config;
/// Single-assignment result channel: `Promise` (write side) and `Future`
/// (read side).
pub mod future;
/// Jobs: unit of work, life-cycle phase and dependency counter.
///
/// Defines `Job`, the `Execute` body trait, `JobPhase` and the `Ownership`
/// tag that decides who keeps a finished job alive.
pub mod job;
/// Worker pool owning a bounded queue of runnable jobs.
///
/// Contains dispatch (start, queue, wake) and completion propagation across
/// managers.
pub mod manager;
/// Bounded lock-free MPMC queue.
pub mod queue;
/// Manual-reset event used for completion signals and blocking waits.
pub mod signal;
mod sync;
/// Identifier and helper types shared across the crate.
pub mod types;
mod utils;

pub use crate::{
    batch::JobBatch,
    config::{ConfigError, JobManagerConfig, MAX_JOB_THREADS},
    future::{Future, FutureError, FutureResult, FutureStatus, Promise},
    job::{Execute, Job, JobHandle, JobPhase, Ownership},
    manager::{JobManager, JobManagerError},
    queue::{BoundedQueue, CapacityError},
    signal::Signal,
    types::ManagerId,
};
