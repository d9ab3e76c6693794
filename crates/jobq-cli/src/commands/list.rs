//! `jobq list` - list jobs, optionally filtered by state.

use anyhow::{Context, Result};
use jobq_core::config::StateDir;
use jobq_core::store::{JobState, Store};

/// Prints one block per job, newest update first.
pub fn run(state_dir: &StateDir, state: Option<&str>) -> Result<()> {
    let filter = state
        .map(str::parse::<JobState>)
        .transpose()
        .context("invalid --state value")?;

    state_dir.ensure()?;
    let store = Store::open(state_dir.db_path())?;
    let jobs = store.list(filter)?;

    if jobs.is_empty() {
        match filter {
            Some(state) => println!("No jobs found with state: {state}"),
            None => println!("No jobs found."),
        }
        return Ok(());
    }

    for job in jobs {
        println!("{} [{}] attempts={}", job.id, job.state, job.attempts);
        println!("  command: {}", job.command);
        println!("  updated: {}", job.updated_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
    }

    Ok(())
}
