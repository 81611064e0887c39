#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use assert_matches::assert_matches;
use jobgraph::{
    CapacityError, ConfigError, Future, FutureError, Job, JobManager, JobManagerError, JobPhase,
    MAX_JOB_THREADS, Ownership, Signal,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

const LONG: Option<Duration> = Some(Duration::from_secs(10));

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn manager(name: &str, threads: usize) -> JobManager {
    manager_with_capacity(name, threads, 64)
}

fn manager_with_capacity(name: &str, threads: usize, queue_capacity: usize) -> JobManager {
    init_tracing();
    JobManager::with_threads(name, threads, queue_capacity).expect("valid manager config")
}

fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> impl FnMut() + Send + 'static {
    let log = log.clone();
    move || log.lock().unwrap().push(name)
}

#[test]
fn independent_jobs_run_exactly_once() {
    // Every job is runnable at once, so the queue must hold all of them.
    let jobs = manager_with_capacity("independent", 4, 256);
    let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..200).map(|_| AtomicUsize::new(0)).collect());

    let handles: Vec<_> = (0..200)
        .map(|i| {
            let runs = runs.clone();
            Job::from_fn(format!("job-{i}"), move || {
                runs[i].fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    for job in &handles {
        jobs.start_job(job);
    }

    assert!(jobs.wait(LONG));
    assert!(jobs.all_jobs_completed());
    assert!(runs.iter().all(|count| count.load(Ordering::SeqCst) == 1));
    assert!(handles.iter().all(|job| job.is_done()));
}

#[test]
fn dependent_started_first_waits_for_its_dependency() {
    let jobs = manager("ordering", 2);
    let log = recorder();

    let a = Job::from_fn("a", {
        let mut record = record(&log, "a");
        move || {
            thread::sleep(Duration::from_millis(20));
            record();
        }
    });
    let b = Job::from_fn("b", record(&log, "b"));
    b.add_wait(&a);
    assert_eq!(b.pending_waits(), 2);

    jobs.start_job(&b);
    assert_eq!(b.phase(), JobPhase::Started);
    assert_eq!(b.pending_waits(), 1);
    // B is dormant, so the manager has nothing to do.
    assert!(jobs.wait(LONG));
    assert!(!b.is_done());
    assert!(log.lock().unwrap().is_empty());

    jobs.start_job(&a);
    assert!(jobs.wait(LONG));
    assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    assert!(b.is_done());
}

#[test]
fn diamond_runs_join_after_both_branches() {
    //   root
    //   /  \
    //  l    r
    //   \  /
    //   join
    let jobs = manager("diamond", 4);
    let log = recorder();
    let root = Job::from_fn("root", record(&log, "root"));
    let left = Job::from_fn("left", record(&log, "left"));
    let right = Job::from_fn("right", record(&log, "right"));
    let join = Job::from_fn("join", record(&log, "join"));
    left.add_wait(&root);
    right.add_wait(&root);
    join.add_wait(&left);
    join.add_wait(&right);

    for job in [&join, &right, &left, &root] {
        jobs.start_job(job);
    }
    assert!(jobs.wait(LONG));

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 4);
    assert_eq!(log.first(), Some(&"root"));
    assert_eq!(log.last(), Some(&"join"));
}

#[test]
fn dependency_on_another_manager_runs_on_the_owning_pool() {
    let decode = manager("decode", 2);
    let render = manager("render", 1);
    let ran_on = Arc::new(Mutex::new(None));

    let load = Job::from_fn("load", || thread::sleep(Duration::from_millis(10)));
    let upload = Job::from_fn("upload", {
        let ran_on = ran_on.clone();
        move || *ran_on.lock().unwrap() = thread::current().name().map(str::to_owned)
    });
    upload.set_signal(Some(Arc::new(Signal::new())));
    upload.add_wait(&load);

    render.start_job(&upload);
    decode.start_job(&load);

    assert!(upload.wait(LONG));
    assert!(load.is_done());
    let ran_on = ran_on.lock().unwrap().clone().unwrap();
    assert!(ran_on.starts_with("render-"), "ran on {ran_on}");
}

#[test]
fn waiting_on_a_finished_job_is_a_no_op() {
    let jobs = manager("finished", 1);
    let first = Job::from_fn("first", || {});
    jobs.start_job(&first);
    assert!(jobs.wait(LONG));
    assert!(first.is_done());

    let second = Job::from_fn("second", || {});
    second.add_wait(&first);
    assert_eq!(second.pending_waits(), 1);
    jobs.start_job(&second);
    assert!(jobs.wait(LONG));
    assert!(second.is_done());
}

#[test]
fn caller_owned_job_can_run_again_after_init() {
    let jobs = manager("rerun", 2);
    let runs = Arc::new(AtomicUsize::new(0));
    let job = Job::from_fn("counter", {
        let runs = runs.clone();
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
        }
    });
    assert_eq!(job.ownership(), Ownership::Caller);

    jobs.start_job(&job);
    assert!(jobs.wait(LONG));
    jobs.init_start_job(&job);
    assert!(jobs.wait(LONG));

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(job.phase(), JobPhase::Done);
}

#[test]
fn rerun_job_signal_waits_for_the_new_run() {
    let jobs = manager("rerun-signal", 2);
    let gate = Arc::new(Signal::new());
    let job = Job::from_fn("gated", {
        let gate = gate.clone();
        move || {
            gate.wait(None);
        }
    });
    job.set_signal(Some(Arc::new(Signal::new())));

    gate.raise();
    jobs.start_job(&job);
    assert!(job.wait(LONG));
    assert!(job.is_done());

    gate.clear();
    job.init_job();
    assert!(!job.signal().unwrap().is_raised());
    jobs.start_job(&job);
    assert!(!job.wait(Some(Duration::from_millis(50))));
    assert_eq!(job.phase(), JobPhase::Started);

    gate.raise();
    assert!(job.wait(LONG));
    assert!(job.is_done());
    assert!(jobs.wait(LONG));
}

#[test]
fn add_wait_racing_with_completion_runs_dependent_once_after_done() {
    let jobs = manager("edge-race", 4);
    for round in 0..500 {
        let first = Job::from_fn(format!("first-{round}"), || {});
        jobs.start_job(&first);

        let runs = Arc::new(AtomicUsize::new(0));
        let saw_done = Arc::new(AtomicBool::new(false));
        let second = Job::from_fn(format!("second-{round}"), {
            let first = first.clone();
            let runs = runs.clone();
            let saw_done = saw_done.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                saw_done.store(first.is_done(), Ordering::SeqCst);
            }
        });
        second.set_signal(Some(Arc::new(Signal::new())));
        // `first` may be queued, running or already done at this point.
        second.add_wait(&first);
        jobs.start_job(&second);

        assert!(second.wait(LONG), "round {round}: dependent never ran");
        assert!(jobs.wait(LONG));
        assert_eq!(runs.load(Ordering::SeqCst), 1, "round {round}");
        assert!(saw_done.load(Ordering::SeqCst), "round {round}");
    }
}

#[test]
fn manager_owned_job_releases_its_body() {
    let jobs = manager("release", 1);
    let token = Arc::new(());
    let job = Job::from_fn("owned", {
        let token = token.clone();
        move || {
            let _ = &token;
        }
    });
    job.delete_on_finish();
    assert_eq!(Arc::strong_count(&token), 2);

    jobs.start_job(&job);
    assert!(jobs.wait(LONG));
    assert_eq!(job.ownership(), Ownership::Manager);
    assert_eq!(Arc::strong_count(&token), 1);
}

#[test]
#[should_panic(expected = "released by its manager")]
fn released_job_cannot_be_reinitialized() {
    let jobs = manager("released", 1);
    let job = Job::from_fn("owned", || {});
    job.delete_on_finish();
    jobs.start_job(&job);
    assert!(jobs.wait(LONG));
    job.init_job();
}

#[test]
#[should_panic(expected = "still in flight")]
fn init_job_panics_while_dormant() {
    let jobs = manager("in-flight", 1);
    let never = Job::from_fn("never", || {});
    let dormant = Job::from_fn("dormant", || {});
    dormant.add_wait(&never);
    jobs.start_job(&dormant);
    dormant.init_job();
}

#[test]
#[should_panic(expected = "must be initialized")]
fn starting_twice_panics() {
    let jobs = manager("twice", 1);
    let job = Job::from_fn("twice", || {});
    jobs.start_job(&job);
    jobs.start_job(&job);
}

#[test]
#[should_panic(expected = "already been dispatched")]
fn add_wait_after_dispatch_panics() {
    let jobs = manager("late-edge", 1);
    let done = Job::from_fn("done", || {});
    jobs.start_job(&done);
    assert!(jobs.wait(LONG));
    let fresh = Job::from_fn("fresh", || {});
    done.add_wait(&fresh);
}

#[test]
#[should_panic(expected = "has not been started")]
fn waiting_on_an_unstarted_job_panics() {
    let job = Job::from_fn("idle", || {});
    job.set_signal(Some(Arc::new(Signal::new())));
    job.wait(Some(Duration::ZERO));
}

#[test]
fn queue_overflow_on_dispatch_panics() {
    let jobs = JobManager::with_threads("overflow", 1, 2).unwrap();
    let entered = Arc::new(Signal::new());
    let gate = Arc::new(Signal::new());
    let blocker = Job::from_fn("blocker", {
        let entered = entered.clone();
        let gate = gate.clone();
        move || {
            entered.raise();
            gate.wait(None);
        }
    });
    jobs.start_job(&blocker);
    assert!(entered.wait(LONG));

    jobs.start_job(&Job::from_fn("fill-1", || {}));
    jobs.start_job(&Job::from_fn("fill-2", || {}));
    let overflow = Job::from_fn("overflow", || {});
    let result = panic::catch_unwind(AssertUnwindSafe(|| jobs.start_job(&overflow)));

    gate.raise();
    assert!(result.is_err());
    assert!(jobs.wait(LONG));
    assert!(!overflow.is_done());
}

#[test]
fn wait_times_out_while_a_job_is_blocked() {
    let jobs = manager("timeout", 1);
    let gate = Arc::new(Signal::new());
    let job = Job::from_fn("blocked", {
        let gate = gate.clone();
        move || {
            gate.wait(None);
        }
    });
    assert!(jobs.all_jobs_completed());
    jobs.start_job(&job);

    assert!(!jobs.wait(Some(Duration::from_millis(20))));
    assert!(!jobs.all_jobs_completed());
    gate.raise();
    assert!(jobs.wait(None));
    assert!(jobs.all_jobs_completed());
}

#[test]
fn completion_signal_is_raised_on_done() {
    let jobs = manager("signal", 2);
    let signal = Arc::new(Signal::new());
    let job = Job::parallel("sum", 100, |_| {});
    job.set_signal(Some(signal.clone()));
    jobs.start_job(&job);
    assert!(job.wait(LONG));
    assert!(signal.is_raised());
    assert!(job.is_done());
}

#[test]
fn parallel_job_visits_every_index_in_order() {
    let jobs = manager("parallel", 1);
    let visited = Arc::new(Mutex::new(Vec::new()));
    let job = Job::parallel("indices", 5, {
        let visited = visited.clone();
        move |i| visited.lock().unwrap().push(i)
    });
    jobs.start_job(&job);
    assert!(jobs.wait(LONG));
    assert_eq!(*visited.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn parallel_for_covers_every_index_once() {
    let jobs = manager("parallel-for", 4);
    let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..1000).map(|_| AtomicUsize::new(0)).collect());
    let join = jobs.parallel_for("hits", 1000, 64, {
        let hits = hits.clone();
        move |i| {
            hits[i].fetch_add(1, Ordering::SeqCst);
        }
    });

    let saw_all = Arc::new(AtomicBool::new(false));
    let after = Job::from_fn("after", {
        let hits = hits.clone();
        let saw_all = saw_all.clone();
        move || {
            let all = hits.iter().all(|hit| hit.load(Ordering::SeqCst) == 1);
            saw_all.store(all, Ordering::SeqCst);
        }
    });
    after.add_wait(&join);
    after.set_signal(Some(Arc::new(Signal::new())));
    jobs.start_job(&after);

    assert!(join.wait(LONG));
    assert!(after.wait(LONG));
    assert!(saw_all.load(Ordering::SeqCst));
    assert!(hits.iter().all(|hit| hit.load(Ordering::SeqCst) == 1));
}

#[test]
fn start_with_future_resolves_value_and_error() {
    let jobs = manager("futures", 2);
    let ok = jobs.start_with_future("ok", || Ok(6 * 7));
    let failed: Future<i32> =
        jobs.start_with_future("failed", || Err(FutureError::new(5, "bad input")));

    assert!(ok.wait(LONG));
    assert!(failed.wait(LONG));
    assert_eq!(*ok.get_result(), 42);
    assert_eq!(failed.error_code(), 5);
    assert_eq!(failed.error_message(), "bad input");
}

#[test]
fn thread_count_is_clamped_and_reported() {
    let jobs = JobManager::with_threads("wide", MAX_JOB_THREADS + 8, 16).unwrap();
    assert_eq!(jobs.job_threads_count(), MAX_JOB_THREADS);
    assert_eq!(jobs.queue_capacity(), 16);
    assert_eq!(jobs.name(), "wide");

    let other = manager("other", 1);
    assert_ne!(jobs.id(), other.id());
}

#[test]
fn invalid_config_is_rejected() {
    assert_matches!(
        JobManager::with_threads("odd", 2, 3),
        Err(JobManagerError::Config(ConfigError::Capacity(CapacityError::NotPowerOfTwo(3))))
    );
    assert_matches!(
        JobManager::with_threads("none", 0, 8),
        Err(JobManagerError::Config(ConfigError::NoThreads))
    );
}

#[test]
fn dropping_the_manager_joins_workers() {
    let token = Arc::new(());
    {
        let jobs = manager("drop", 3);
        for i in 0..10 {
            let token = token.clone();
            jobs.start_job(&Job::from_fn(format!("drop-{i}"), move || {
                let _ = &token;
                thread::sleep(Duration::from_millis(1));
            }));
        }
        assert!(jobs.wait(LONG));
    }
    assert_eq!(Arc::strong_count(&token), 1);
}
