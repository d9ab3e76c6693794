//! `jobq enqueue` - add a job to the queue.

use anyhow::{Context, Result};
use jobq_core::config::StateDir;
use jobq_core::store::{JobRequest, Store};

/// Parses the JSON job description, stores it, and prints the id.
pub fn run(state_dir: &StateDir, job_json: &str) -> Result<()> {
    let request: JobRequest =
        serde_json::from_str(job_json).context("invalid job JSON")?;

    state_dir.ensure()?;
    let store = Store::open(state_dir.db_path())?;
    let id = store.enqueue(&request)?;
    println!("Enqueued job {id}");
    Ok(())
}
