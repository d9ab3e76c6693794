//! The worker loop: claim a job, execute it, settle the outcome.
//!
//! A worker is straight-line blocking code. Each iteration claims at most
//! one job, runs it to completion, and records the outcome before looking at
//! the queue again. The shared stop flag is only consulted between
//! iterations, so an in-flight job always reaches a terminal transition
//! before the worker exits.
//!
//! Workers never talk to each other; all coordination goes through the
//! store's claim transaction and the stop flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::executor::{self, Outcome};
use crate::policy::{self, Decision};
use crate::store::{Job, Store, StoreError};

/// How long an idle worker sleeps before polling the queue again.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Granularity at which the idle sleep re-checks the stop flag.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// A single worker: one claimed job at a time, until told to stop.
pub struct Worker {
    store: Store,
    config: Config,
    tag: u32,
    poll_interval: Duration,
}

impl Worker {
    /// Creates a worker over the given store.
    ///
    /// The tag identifies the worker in logs; it is never persisted.
    #[must_use]
    pub fn new(store: Store, config: Config, tag: u32) -> Self {
        Self {
            store,
            config,
            tag,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Overrides the idle poll interval (mainly for tests).
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs the claim/execute/settle loop until `stop` is set.
    ///
    /// The flag is observed at loop boundaries only. A store failure that
    /// survives the store's internal retries is treated as unrecoverable
    /// wherever it occurs - claiming or settling: the worker logs it and
    /// exits, leaving its siblings running.
    pub fn run(&self, stop: &AtomicBool) {
        info!(worker = self.tag, "worker started");

        while !stop.load(Ordering::SeqCst) {
            let step = match self.store.fetch_and_claim(self.tag) {
                Ok(Some(job)) => self.process(&job),
                Ok(None) => {
                    self.idle_sleep(stop);
                    Ok(())
                },
                Err(err) => Err(err),
            };

            if let Err(err) = step {
                error!(worker = self.tag, error = %err, "store failure, worker exiting");
                break;
            }
        }

        info!(worker = self.tag, "worker stopped");
    }

    /// Executes one claimed job and records the outcome.
    ///
    /// The executor itself cannot fail the worker - every anomaly becomes a
    /// failure outcome routed through the policy. An error while recording
    /// the outcome is a store failure and surfaces to the loop; continuing
    /// past it would leave the job stranded in `processing`.
    fn process(&self, job: &Job) -> Result<(), StoreError> {
        info!(worker = self.tag, job = %job.id, command = %job.command, "executing job");

        match executor::execute(&job.command) {
            Outcome::Success => {
                info!(worker = self.tag, job = %job.id, "job completed");
                self.store.complete(&job.id)
            },
            Outcome::Failure { reason } => self.handle_failure(job, &reason),
        }
    }

    /// Routes a failed attempt through the retry policy.
    fn handle_failure(&self, job: &Job, reason: &str) -> Result<(), StoreError> {
        let attempts_after = job.attempts + 1;
        match policy::decide(attempts_after, self.config.max_retries, self.config.backoff_base) {
            Decision::Reschedule(delay) => {
                warn!(
                    worker = self.tag,
                    job = %job.id,
                    attempt = attempts_after,
                    delay_secs = delay.as_secs(),
                    reason,
                    "job failed, retry scheduled"
                );
                self.store.reschedule(&job.id, delay)
            },
            Decision::GiveUp => {
                warn!(
                    worker = self.tag,
                    job = %job.id,
                    attempts = attempts_after,
                    reason,
                    "job failed permanently, moving to dead letter queue"
                );
                self.store.give_up(&job.id, Some(reason))
            },
        }
    }

    /// Sleeps for one poll interval, waking early if the stop flag is set.
    fn idle_sleep(&self, stop: &AtomicBool) {
        let mut remaining = self.poll_interval;
        while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
            let slice = remaining.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            remaining -= slice;
        }
    }
}
