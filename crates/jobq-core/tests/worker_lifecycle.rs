//! End-to-end worker behavior against a temporary queue.
//!
//! These tests drive the real worker loop in a thread, with a short poll
//! interval and a constant one-second backoff so the whole retry ladder fits
//! in a few seconds of wall clock.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use jobq_core::config::Config;
use jobq_core::store::{JobRequest, JobState, Store};
use jobq_core::worker::Worker;
use tempfile::TempDir;

fn test_config() -> Config {
    Config {
        max_retries: 2,
        backoff_base: 1,
    }
}

fn spawn_worker(path: &Path, stop: &Arc<AtomicBool>) -> JoinHandle<()> {
    let store = Store::open(path).expect("open store");
    let worker = Worker::new(store, test_config(), 0)
        .with_poll_interval(Duration::from_millis(50));
    let stop = Arc::clone(stop);
    thread::spawn(move || worker.run(&stop))
}

fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    condition()
}

#[cfg_attr(miri, ignore)] // spawns real child processes
#[test]
fn successful_job_completes_with_zero_attempts() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("queue.db");
    let store = Store::open(&path).expect("open store");

    store
        .enqueue(&JobRequest {
            id: Some("j1".to_string()),
            command: "true".to_string(),
        })
        .expect("enqueue");

    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_worker(&path, &stop);

    assert!(
        wait_for(
            || {
                store
                    .list(Some(JobState::Completed))
                    .is_ok_and(|jobs| jobs.iter().any(|j| j.id == "j1"))
            },
            Duration::from_secs(5),
        ),
        "job never completed"
    );

    stop.store(true, Ordering::SeqCst);
    handle.join().expect("worker thread panicked");

    let jobs = store.list(Some(JobState::Completed)).expect("list");
    let job = jobs.iter().find(|j| j.id == "j1").expect("completed row");
    assert_eq!(job.attempts, 0);
    assert!(store.dlq_list().expect("dlq_list").is_empty());
}

#[cfg_attr(miri, ignore)] // spawns real child processes
#[test]
fn failing_job_exhausts_retries_and_lands_in_dlq() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("queue.db");
    let store = Store::open(&path).expect("open store");

    store
        .enqueue(&JobRequest {
            id: Some("jf".to_string()),
            command: "exit 1".to_string(),
        })
        .expect("enqueue");

    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_worker(&path, &stop);

    // With max_retries = 2 and backoff_base = 1 the job fails, retries after
    // one second twice, and the third failure is final.
    assert!(
        wait_for(
            || {
                store
                    .dlq_list()
                    .is_ok_and(|dead| dead.iter().any(|d| d.id == "jf"))
            },
            Duration::from_secs(10),
        ),
        "job never reached the dead letter queue"
    );

    stop.store(true, Ordering::SeqCst);
    handle.join().expect("worker thread panicked");

    assert!(store.list(None).expect("list").is_empty());

    let dead = store.dlq_list().expect("dlq_list");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, "jf");
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(dead[0].last_error.as_deref(), Some("exit code 1"));
}

#[cfg_attr(miri, ignore)] // spawns real child processes
#[test]
fn dead_job_can_be_retried_and_fails_the_same_way() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("queue.db");
    let store = Store::open(&path).expect("open store");

    store
        .enqueue(&JobRequest {
            id: Some("jf".to_string()),
            command: "exit 1".to_string(),
        })
        .expect("enqueue");

    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_worker(&path, &stop);
    assert!(
        wait_for(
            || store.dlq_list().is_ok_and(|dead| !dead.is_empty()),
            Duration::from_secs(10),
        ),
        "first pass never dead-lettered the job"
    );
    stop.store(true, Ordering::SeqCst);
    handle.join().expect("worker thread panicked");

    // Back into the queue as a fresh pending job.
    store.dlq_retry("jf").expect("dlq_retry");
    let jobs = store.list(Some(JobState::Pending)).expect("list");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].attempts, 0);

    // A second worker pass exhausts the budget again.
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_worker(&path, &stop);
    assert!(
        wait_for(
            || store.dlq_list().is_ok_and(|dead| !dead.is_empty()),
            Duration::from_secs(10),
        ),
        "second pass never dead-lettered the job"
    );
    stop.store(true, Ordering::SeqCst);
    handle.join().expect("worker thread panicked");

    let dead = store.dlq_list().expect("dlq_list");
    assert_eq!(dead[0].attempts, 3);
}

#[cfg_attr(miri, ignore)] // spawns real child processes
#[test]
fn stop_flag_lets_in_flight_job_finish() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("queue.db");
    let store = Store::open(&path).expect("open store");

    store
        .enqueue(&JobRequest {
            id: Some("jslow".to_string()),
            command: "sleep 1".to_string(),
        })
        .expect("enqueue");

    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_worker(&path, &stop);

    assert!(
        wait_for(
            || {
                store
                    .list(Some(JobState::Processing))
                    .is_ok_and(|jobs| !jobs.is_empty())
            },
            Duration::from_secs(5),
        ),
        "job was never claimed"
    );

    // Request a stop mid-execution: the worker must finish the job first.
    stop.store(true, Ordering::SeqCst);
    handle.join().expect("worker thread panicked");

    let jobs = store.list(Some(JobState::Completed)).expect("list");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, "jslow");
    assert!(store.list(Some(JobState::Processing)).expect("list").is_empty());
}
