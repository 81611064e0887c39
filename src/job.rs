use crate::{manager::ManagerShared, signal::Signal};
use core::{
    fmt, mem, ptr,
    sync::atomic::{AtomicUsize, Ordering},
};
use std::{
    borrow::Cow,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Shared handle to a [`Job`].
///
/// The caller, the manager that dispatches the job and every job that must
/// be notified when it finishes each hold one of these.
pub type JobHandle = Arc<Job>;

/// Body of a job.
///
/// Invoked exactly once per run, on a worker thread of the manager the job
/// was started on. Implemented for every `FnMut() + Send` closure.
pub trait Execute: Send {
    /// Performs the work. Must not panic: a panicking body aborts the
    /// process. Report failures through a [`Promise`](crate::future::Promise)
    /// instead.
    fn execute(&mut self);
}

impl<F: FnMut() + Send> Execute for F {
    fn execute(&mut self) {
        self();
    }
}

/// Life-cycle phase of a job.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum JobPhase {
    /// Freshly created or re-initialized; not registered with any manager.
    #[default]
    Init,
    /// Registered with a manager; queued, running, or waiting on
    /// dependencies.
    Started,
    /// Body has run and dependents have been released.
    Done,
}

/// Who keeps a job alive after it finishes.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// The caller holds on to the job and may re-initialize it.
    #[default]
    Caller,
    /// The manager releases the body right after the job finishes and the
    /// job can't be run again.
    Manager,
}

/// A schedulable unit of work plus its dependency edges.
///
/// The dependency counter starts at one for the job itself and gains one
/// for every unfinished job it [waits on](Job::add_wait). Starting the job
/// removes the self reference and each finished dependency removes its own;
/// whoever brings the counter to zero pushes the job into its manager's
/// queue.
pub struct Job {
    name: Cow<'static, str>,
    wait_count: AtomicUsize,
    state: Mutex<JobState>,
    body: Mutex<Option<Box<dyn Execute>>>,
}

struct JobState {
    phase: JobPhase,
    ownership: Ownership,
    released: bool,
    owner: Option<Arc<ManagerShared>>,
    dependents: Vec<JobHandle>,
    signal: Option<Arc<Signal>>,
}

/// What a finished job hands back to the manager for propagation.
pub(crate) struct Finished {
    pub(crate) dependents: Vec<JobHandle>,
    pub(crate) signal: Option<Arc<Signal>>,
    pub(crate) ownership: Ownership,
}

impl Job {
    /// Creates a job in the [`JobPhase::Init`] phase.
    pub fn new(name: impl Into<Cow<'static, str>>, body: impl Execute + 'static) -> JobHandle {
        Arc::new(Self {
            name: name.into(),
            wait_count: AtomicUsize::new(1),
            state: Mutex::new(JobState {
                phase: JobPhase::Init,
                ownership: Ownership::Caller,
                released: false,
                owner: None,
                dependents: Vec::new(),
                signal: None,
            }),
            body: Mutex::new(Some(Box::new(body))),
        })
    }

    /// Creates a job running `f`.
    pub fn from_fn(
        name: impl Into<Cow<'static, str>>,
        f: impl FnMut() + Send + 'static,
    ) -> JobHandle {
        Self::new(name, f)
    }

    /// Creates a job that calls `f(i)` for every `i` in `0..count`, in order,
    /// on a single worker.
    pub fn parallel(
        name: impl Into<Cow<'static, str>>,
        count: usize,
        mut f: impl FnMut(usize) + Send + 'static,
    ) -> JobHandle {
        Self::new(name, move || (0..count).for_each(&mut f))
    }

    /// Name given at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current life-cycle phase.
    #[must_use]
    pub fn phase(&self) -> JobPhase {
        self.lock_state().phase
    }

    /// Whether the job has finished its current run.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase() == JobPhase::Done
    }

    /// Current value of the dependency counter.
    ///
    /// Includes the job's own reference until it has been started.
    #[must_use]
    pub fn pending_waits(&self) -> usize {
        self.wait_count.load(Ordering::Acquire)
    }

    /// Current ownership tag.
    #[must_use]
    pub fn ownership(&self) -> Ownership {
        self.lock_state().ownership
    }

    /// Resets the job for a new run: phase [`JobPhase::Init`], no dependents,
    /// counter back to one and the completion signal cleared.
    ///
    /// # Panics
    /// If the job is started but not finished yet, or if its manager has
    /// already released it.
    pub fn init_job(&self) {
        let mut state = self.lock_state();
        assert_ne!(
            state.phase,
            JobPhase::Started,
            "Job::init_job: job '{}' is still in flight",
            self.name
        );
        assert!(
            !state.released,
            "Job::init_job: job '{}' was released by its manager",
            self.name
        );
        state.phase = JobPhase::Init;
        state.owner = None;
        state.dependents.clear();
        if let Some(signal) = &state.signal {
            signal.clear();
        }
        self.wait_count.store(1, Ordering::Release);
    }

    /// Makes this job wait until `other` is [`JobPhase::Done`].
    ///
    /// Does nothing if `other` has already finished. `other` may belong to a
    /// different manager than this job.
    ///
    /// # Panics
    /// If this job has already been dispatched, or if `other` is this job.
    pub fn add_wait(self: &Arc<Self>, other: &Job) {
        assert!(
            !ptr::eq(&**self, other),
            "Job::add_wait: job '{}' can't wait on itself",
            self.name
        );
        let mut other_state = other.lock_state();
        if other_state.phase == JobPhase::Done {
            return;
        }
        let prev = self.wait_count.fetch_add(1, Ordering::AcqRel);
        assert_ne!(
            prev, 0,
            "Job::add_wait: job '{}' has already been dispatched",
            self.name
        );
        other_state.dependents.push(self.clone());
    }

    /// Hands the job over to the manager it is started on: its body is
    /// dropped as soon as it has run and its dependents have been released.
    pub fn delete_on_finish(&self) {
        self.lock_state().ownership = Ownership::Manager;
    }

    /// Sets or removes the signal raised whenever the job reaches
    /// [`JobPhase::Done`].
    pub fn set_signal(&self, signal: Option<Arc<Signal>>) {
        self.lock_state().signal = signal;
    }

    /// The completion signal, if any.
    #[must_use]
    pub fn signal(&self) -> Option<Arc<Signal>> {
        self.lock_state().signal.clone()
    }

    /// Blocks until the completion signal is raised or `timeout` elapses.
    ///
    /// # Panics
    /// If the job has no completion signal or has never been started.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let signal = {
            let state = self.lock_state();
            assert_ne!(
                state.phase,
                JobPhase::Init,
                "Job::wait: job '{}' has not been started",
                self.name
            );
            state
                .signal
                .clone()
                .unwrap_or_else(|| panic!("Job::wait: job '{}' has no signal", self.name))
        };
        signal.wait(timeout)
    }

    pub(crate) fn mark_started(&self, owner: Arc<ManagerShared>) {
        let mut state = self.lock_state();
        assert_eq!(
            state.phase,
            JobPhase::Init,
            "JobManager::start_job: job '{}' must be initialized before it is started",
            self.name
        );
        state.phase = JobPhase::Started;
        state.owner = Some(owner);
    }

    /// Drops one reference from the dependency counter. Returns `true` for
    /// the caller that brought it to zero.
    pub(crate) fn release_wait(&self) -> bool {
        let prev = self.wait_count.fetch_sub(1, Ordering::AcqRel);
        assert_ne!(prev, 0, "Job::release_wait: job '{}' underflow", self.name);
        prev == 1
    }

    pub(crate) fn owner(&self) -> Arc<ManagerShared> {
        self.lock_state()
            .owner
            .clone()
            .expect("Job::owner: runnable job has no manager")
    }

    pub(crate) fn run(&self) {
        let mut body = self.body.lock().unwrap_or_else(PoisonError::into_inner);
        body.as_mut().expect("Job::run: [1]").execute();
    }

    pub(crate) fn finish(&self) -> Finished {
        let mut state = self.lock_state();
        state.phase = JobPhase::Done;
        state.owner = None;
        Finished {
            dependents: mem::take(&mut state.dependents),
            signal: state.signal.clone(),
            ownership: state.ownership,
        }
    }

    pub(crate) fn release(&self) {
        self.lock_state().released = true;
        drop(self.body.lock().unwrap_or_else(PoisonError::into_inner).take());
    }

    fn lock_state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("phase", &state.phase)
            .field("ownership", &state.ownership)
            .field("pending_waits", &self.pending_waits())
            .field("dependents", &state.dependents.len())
            .finish_non_exhaustive()
    }
}
