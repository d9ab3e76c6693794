//! # jobq-core
//!
//! Core library for jobq - a local, persistent background job queue with
//! concurrent worker supervision, bounded retries with exponential backoff,
//! and a dead letter queue.
//!
//! ## Features
//!
//! - **Transactional queue**: `SQLite`-backed job storage where every claim
//!   happens inside a write-locking transaction, so a job is taken by at most
//!   one worker
//! - **Retry policy**: pure backoff decisions (`base ^ attempts` seconds) with
//!   a bounded retry budget and a dead letter queue for exhausted jobs
//! - **Worker supervision**: a supervisor process that spawns worker
//!   processes, relays termination signals, and joins them for a graceful
//!   stop
//!
//! ## Example
//!
//! ```rust,no_run
//! use jobq_core::store::{JobRequest, Store};
//!
//! # fn example() -> Result<(), jobq_core::store::StoreError> {
//! let store = Store::open("/path/to/queue.db")?;
//!
//! let id = store.enqueue(&JobRequest {
//!     id: None,
//!     command: "tar czf backup.tgz ~/notes".to_string(),
//! })?;
//!
//! // A worker claims the job and runs it; once the command exits zero the
//! // row shows up as completed.
//! if let Some(job) = store.fetch_and_claim(0)? {
//!     assert_eq!(job.id, id);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod executor;
pub mod policy;
pub mod store;
pub mod supervisor;
pub mod worker;

pub use config::{Config, StateDir};
pub use store::{DeadJob, Job, JobRequest, JobState, Store, StoreError};
pub use supervisor::{Supervisor, SupervisorError, WorkerSpec};
pub use worker::Worker;
