//! `jobq status` - worker liveness and job counts.

use anyhow::Result;
use jobq_core::config::StateDir;
use jobq_core::store::Store;
use jobq_core::supervisor;

/// Prints worker status, per-state job counts, and the DLQ size.
pub fn run(state_dir: &StateDir) -> Result<()> {
    state_dir.ensure()?;
    let store = Store::open(state_dir.db_path())?;
    let counts = store.counts()?;

    println!("Workers:");
    match supervisor::running_pid(state_dir) {
        Some(pid) => println!("  running (supervisor pid {pid})"),
        None => println!("  stopped"),
    }

    println!();
    println!("Jobs:");
    println!("  pending:    {}", counts.pending);
    println!("  processing: {}", counts.processing);
    println!("  failed:     {}", counts.failed);
    println!("  completed:  {}", counts.completed);
    println!("  total:      {}", counts.total());

    println!();
    println!("Dead letter queue:");
    println!("  dead:       {}", counts.dead);

    Ok(())
}
