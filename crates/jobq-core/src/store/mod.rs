//! `SQLite`-backed job queue storage.
//!
//! This module owns the two durable tables of the queue: `jobs` (live jobs in
//! any of the four lifecycle states) and `dlq` (jobs whose retry budget is
//! exhausted). The database runs in WAL mode so readers do not block the
//! writers, and every state transition that must be exclusive runs inside an
//! immediate transaction that takes the write lock up front.
//!
//! The claim transaction is the sole mechanism keeping two workers from
//! taking the same job: [`Store::fetch_and_claim`] selects the earliest
//! eligible row and flips it to `processing` before the transaction commits.
//! The transaction always commits before the claimed command starts running.

// SQLite returns i64 for counts and timestamps; values in this schema are
// always non-negative and well inside range. A poisoned mutex means another
// thread panicked mid-operation and there is nothing sensible to recover.
#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::missing_panics_doc
)]

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;


/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// How many times a write is retried when the database is locked by another
/// process.
const BUSY_RETRY_LIMIT: usize = 5;

/// Backoff slept before each busy retry, in milliseconds. The total stays
/// under 100 ms.
const BUSY_RETRY_DELAYS_MS: [u64; BUSY_RETRY_LIMIT] = [5, 10, 20, 25, 40];

/// Errors that can occur during queue storage operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The id already exists in `jobs` or `dlq`.
    #[error("duplicate job id: {0}")]
    DuplicateId(String),

    /// No row with the requested id.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Database error from `SQLite`, after internal busy retries.
    #[error("database error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Enqueued and waiting for its first attempt.
    Pending,
    /// Claimed by exactly one worker.
    Processing,
    /// A previous attempt failed; eligible again once `run_at` passes.
    Failed,
    /// Finished successfully. Terminal.
    Completed,
}

impl JobState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Processing, Self::Failed, Self::Completed];

    /// The lowercase name stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// Error returned when a string does not name a job state.
#[derive(Debug, Clone, Error)]
#[error("unknown job state: {0}")]
pub struct ParseStateError(String);

/// A job row in the `jobs` table.
#[derive(Debug, Clone)]
pub struct Job {
    /// Stable identifier, unique across `jobs` and `dlq`.
    pub id: String,

    /// Opaque shell command, passed verbatim to the executor.
    pub command: String,

    /// Current lifecycle state.
    pub state: JobState,

    /// Number of failed execution attempts so far.
    pub attempts: u32,

    /// Earliest wall-clock time at which the job may be claimed.
    pub run_at: DateTime<Utc>,

    /// Time the row was inserted.
    pub created_at: DateTime<Utc>,

    /// Time of the last state transition.
    pub updated_at: DateTime<Utc>,
}

/// A row in the dead letter queue.
#[derive(Debug, Clone)]
pub struct DeadJob {
    /// The job's identifier.
    pub id: String,

    /// The command that kept failing.
    pub command: String,

    /// Total execution attempts before the job was given up.
    pub attempts: u32,

    /// Time the job was moved to the dead letter queue.
    pub failed_at: DateTime<Utc>,

    /// Diagnostic from the last failed attempt, if one was recorded.
    pub last_error: Option<String>,
}

/// A job submission, as accepted by `enqueue`.
///
/// Unknown fields in the incoming JSON are ignored; a missing `command` is a
/// deserialization error.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    /// Caller-supplied identifier. A fresh unique token is generated when
    /// absent.
    #[serde(default)]
    pub id: Option<String>,

    /// The shell command to execute.
    pub command: String,
}

/// Job counts by state, plus the dead letter queue size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Jobs waiting for their first attempt.
    pub pending: u64,
    /// Jobs currently claimed by a worker.
    pub processing: u64,
    /// Jobs waiting for a retry.
    pub failed: u64,
    /// Jobs that finished successfully.
    pub completed: u64,
    /// Rows in the dead letter queue.
    pub dead: u64,
}

impl StatusCounts {
    /// Total rows in the `jobs` table (the dead letter queue not included).
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pending + self.processing + self.failed + self.completed
    }
}

/// The durable job queue backed by a single `SQLite` file.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens or creates the queue database at the given path.
    ///
    /// The schema is applied idempotently and WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory queue for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Inserts a new pending job and returns its id.
    ///
    /// Uniqueness is enforced across both tables: an id still sitting in the
    /// dead letter queue cannot be reused until it is retried or pruned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateId`] if the id already exists, or
    /// [`StoreError::Storage`] on database failure.
    pub fn enqueue(&self, request: &JobRequest) -> Result<String, StoreError> {
        let id = request
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        with_busy_retry(|| {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let taken: i64 = tx.query_row(
                "SELECT (SELECT COUNT(*) FROM jobs WHERE id = ?1)
                      + (SELECT COUNT(*) FROM dlq WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            if taken > 0 {
                return Err(StoreError::DuplicateId(id.clone()));
            }

            let now = now_millis();
            tx.execute(
                "INSERT INTO jobs (id, command, state, attempts, run_at, created_at, updated_at)
                 VALUES (?1, ?2, 'pending', 0, ?3, ?3, ?3)",
                params![id, request.command, now],
            )?;
            tx.commit()?;

            debug!(job = %id, "job enqueued");
            Ok(id.clone())
        })
    }

    /// Claims the next eligible job for a worker, if any.
    ///
    /// Runs a single immediate transaction: select the earliest row by
    /// `run_at` (ties broken by `created_at`, then `id`) whose state is
    /// `pending` or `failed` and whose `run_at` has passed, flip it to
    /// `processing`, commit. The write lock held for the duration of the
    /// transaction is what guarantees at-most-one claim per job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on database failure.
    pub fn fetch_and_claim(&self, worker_tag: u32) -> Result<Option<Job>, StoreError> {
        with_busy_retry(|| {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let now = now_millis();
            let job = tx
                .query_row(
                    "SELECT id, command, state, attempts, run_at, created_at, updated_at
                     FROM jobs
                     WHERE state IN ('pending', 'failed') AND run_at <= ?1
                     ORDER BY run_at ASC, created_at ASC, id ASC
                     LIMIT 1",
                    params![now],
                    Self::row_to_job,
                )
                .optional()?;

            let Some(mut job) = job else {
                tx.commit()?;
                return Ok(None);
            };

            tx.execute(
                "UPDATE jobs SET state = 'processing', updated_at = ?1 WHERE id = ?2",
                params![now, job.id],
            )?;
            tx.commit()?;

            job.state = JobState::Processing;
            job.updated_at = millis_to_datetime(now);
            debug!(worker = worker_tag, job = %job.id, "job claimed");
            Ok(Some(job))
        })
    }

    /// Marks a claimed job as completed.
    ///
    /// A job that is not in `processing` is left untouched; that situation
    /// indicates a bug in the caller and is logged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on database failure.
    pub fn complete(&self, id: &str) -> Result<(), StoreError> {
        with_busy_retry(|| {
            let conn = self.conn.lock().unwrap();
            let changed = conn.execute(
                "UPDATE jobs SET state = 'completed', updated_at = ?1
                 WHERE id = ?2 AND state = 'processing'",
                params![now_millis(), id],
            )?;
            if changed == 0 {
                warn!(job = id, "complete() called on a job that is not processing");
            }
            Ok(())
        })
    }

    /// Schedules a retry for a claimed job.
    ///
    /// Transitions `processing -> failed`, increments the attempt counter,
    /// and pushes `run_at` out by `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on database failure.
    pub fn reschedule(&self, id: &str, delay: Duration) -> Result<(), StoreError> {
        with_busy_retry(|| {
            let conn = self.conn.lock().unwrap();
            let now = now_millis();
            let run_at = now.saturating_add(delay.as_millis() as i64);
            let changed = conn.execute(
                "UPDATE jobs
                 SET state = 'failed', attempts = attempts + 1, run_at = ?1, updated_at = ?2
                 WHERE id = ?3 AND state = 'processing'",
                params![run_at, now, id],
            )?;
            if changed == 0 {
                warn!(job = id, "reschedule() called on a job that is not processing");
            }
            Ok(())
        })
    }

    /// Gives up on a claimed job and moves it to the dead letter queue.
    ///
    /// In one transaction: the attempt counter is incremented one final time,
    /// the row is removed from `jobs`, and a `dlq` row is inserted with the
    /// final count and the last error, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on database failure.
    pub fn give_up(&self, id: &str, last_error: Option<&str>) -> Result<(), StoreError> {
        with_busy_retry(|| {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let moved = tx.execute(
                "INSERT INTO dlq (id, command, attempts, failed_at, last_error)
                 SELECT id, command, attempts + 1, ?2, ?3 FROM jobs WHERE id = ?1",
                params![id, now_millis(), last_error],
            )?;
            if moved == 0 {
                warn!(job = id, "give_up() called on an unknown job");
                tx.commit()?;
                return Ok(());
            }
            tx.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
            tx.commit()?;

            debug!(job = id, "job moved to dead letter queue");
            Ok(())
        })
    }

    /// Lists jobs, optionally filtered by state, newest update first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on database failure.
    pub fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let jobs = match state {
            Some(state) => {
                let mut stmt = conn.prepare(
                    "SELECT id, command, state, attempts, run_at, created_at, updated_at
                     FROM jobs WHERE state = ?1
                     ORDER BY updated_at DESC, id ASC",
                )?;
                let rows = stmt.query_map(params![state.as_str()], Self::row_to_job)?;
                rows.collect::<Result<Vec<_>, _>>()?
            },
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, command, state, attempts, run_at, created_at, updated_at
                     FROM jobs
                     ORDER BY updated_at DESC, id ASC",
                )?;
                let rows = stmt.query_map([], Self::row_to_job)?;
                rows.collect::<Result<Vec<_>, _>>()?
            },
        };

        Ok(jobs)
    }

    /// Lists the dead letter queue, most recently failed first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on database failure.
    pub fn dlq_list(&self) -> Result<Vec<DeadJob>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, command, attempts, failed_at, last_error
             FROM dlq
             ORDER BY failed_at DESC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DeadJob {
                id: row.get(0)?,
                command: row.get(1)?,
                attempts: row.get::<_, i64>(2)? as u32,
                failed_at: millis_to_datetime(row.get(3)?),
                last_error: row.get(4)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Moves a dead job back into the queue as a fresh pending job.
    ///
    /// The attempt counter restarts at zero and the job is immediately
    /// eligible.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the id is not in the dead letter
    /// queue, or [`StoreError::Storage`] on database failure.
    pub fn dlq_retry(&self, id: &str) -> Result<(), StoreError> {
        with_busy_retry(|| {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let revived = tx.execute(
                "INSERT INTO jobs (id, command, state, attempts, run_at, created_at, updated_at)
                 SELECT id, command, 'pending', 0, ?2, ?2, ?2 FROM dlq WHERE id = ?1",
                params![id, now_millis()],
            )?;
            if revived == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            tx.execute("DELETE FROM dlq WHERE id = ?1", params![id])?;
            tx.commit()?;

            debug!(job = id, "dead job requeued");
            Ok(())
        })
    }

    /// Counts jobs by state and the dead letter queue size.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on database failure.
    pub fn counts(&self) -> Result<StatusCounts, StoreError> {
        let conn = self.conn.lock().unwrap();

        let mut counts = StatusCounts::default();
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (state, count) = row?;
            let count = count as u64;
            match state.as_str() {
                "pending" => counts.pending = count,
                "processing" => counts.processing = count,
                "failed" => counts.failed = count,
                "completed" => counts.completed = count,
                _ => {},
            }
        }

        counts.dead =
            conn.query_row("SELECT COUNT(*) FROM dlq", [], |row| row.get::<_, i64>(0))? as u64;

        Ok(counts)
    }

    /// Helper to convert a database row to a [`Job`].
    fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
        let state: String = row.get(2)?;
        let state = state
            .parse::<JobState>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

        Ok(Job {
            id: row.get(0)?,
            command: row.get(1)?,
            state,
            attempts: row.get::<_, i64>(3)? as u32,
            run_at: millis_to_datetime(row.get(4)?),
            created_at: millis_to_datetime(row.get(5)?),
            updated_at: millis_to_datetime(row.get(6)?),
        })
    }
}

/// Current wall-clock time as Unix milliseconds.
fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts stored Unix milliseconds back into a timestamp.
fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Runs `op`, retrying a bounded number of times when `SQLite` reports the
/// database as busy or locked by another process.
fn with_busy_retry<T>(mut op: impl FnMut() -> Result<T, StoreError>) -> Result<T, StoreError> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(StoreError::Storage(ref err)) if is_busy(err) && attempt < BUSY_RETRY_LIMIT => {
                std::thread::sleep(Duration::from_millis(BUSY_RETRY_DELAYS_MS[attempt]));
                attempt += 1;
            },
            other => return other,
        }
    }
}

/// Whether the error is transient lock contention worth retrying.
fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if matches!(
            e.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        )
    )
}
