//! `jobq dlq` - inspect and retry dead-lettered jobs.

use anyhow::Result;
use jobq_core::config::StateDir;
use jobq_core::store::Store;

/// Prints one block per dead job, most recently failed first.
pub fn list(state_dir: &StateDir) -> Result<()> {
    state_dir.ensure()?;
    let store = Store::open(state_dir.db_path())?;
    let dead = store.dlq_list()?;

    if dead.is_empty() {
        println!("Dead letter queue is empty.");
        return Ok(());
    }

    println!("Dead letter queue ({} jobs):", dead.len());
    for job in dead {
        println!("{} attempts={}", job.id, job.attempts);
        println!("  command: {}", job.command);
        println!("  failed:  {}", job.failed_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
        if let Some(error) = &job.last_error {
            println!("  error:   {error}");
        }
    }

    Ok(())
}

/// Moves one dead job back into the queue as pending.
pub fn retry(state_dir: &StateDir, id: &str) -> Result<()> {
    state_dir.ensure()?;
    let store = Store::open(state_dir.db_path())?;
    store.dlq_retry(id)?;
    println!("Job {id} moved back to the queue as pending.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use jobq_core::store::{JobRequest, JobState};
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_retry_unknown_id_fails() {
        let dir = TempDir::new().unwrap();
        let state_dir = StateDir::at(dir.path());
        assert!(retry(&state_dir, "ghost").is_err());
    }

    #[test]
    fn test_retry_restores_pending_job() {
        let dir = TempDir::new().unwrap();
        let state_dir = StateDir::at(dir.path());
        state_dir.ensure().unwrap();

        let store = Store::open(state_dir.db_path()).unwrap();
        store
            .enqueue(&JobRequest {
                id: Some("jf".to_string()),
                command: "exit 1".to_string(),
            })
            .unwrap();
        store.fetch_and_claim(0).unwrap().unwrap();
        store.give_up("jf", Some("exit code 1")).unwrap();

        retry(&state_dir, "jf").unwrap();

        let jobs = store.list(Some(JobState::Pending)).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].attempts, 0);
    }
}
