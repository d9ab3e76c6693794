//! `jobq worker` - start, stop, and run worker processes.
//!
//! `start` runs the supervisor in the foreground. Each worker is a separate
//! OS process: the supervisor re-invokes this executable with the hidden
//! `worker run` subcommand, handing over the state directory and the retry
//! configuration on the command line. `stop` signals the supervisor from
//! another terminal and returns immediately.

use anyhow::{Context, Result, bail};
use jobq_core::config::{Config, StateDir};
use jobq_core::store::Store;
use jobq_core::supervisor::{self, Supervisor, WorkerSpec};
use jobq_core::worker::Worker;
use tracing::info;

/// Runs the supervisor with `count` workers in the foreground.
pub fn start(state_dir: &StateDir, count: u32) -> Result<()> {
    if count < 1 {
        bail!("must start at least 1 worker");
    }

    state_dir.ensure()?;
    // Apply the schema once up front so freshly spawned workers don't race
    // to create it.
    Store::open(state_dir.db_path())?;

    let config = Config::load(&state_dir.config_path());
    let spec = WorkerSpec::current_exe(worker_args(state_dir, config))
        .context("cannot resolve own executable")?;

    info!(
        count,
        max_retries = config.max_retries,
        backoff_base = config.backoff_base,
        "starting worker supervisor"
    );
    println!("Starting {count} worker(s); press Ctrl-C to stop.");
    let supervisor = Supervisor::new(state_dir.clone(), spec, count);
    supervisor.run()?;
    Ok(())
}

/// Signals the running supervisor via its pidfile.
pub fn stop(state_dir: &StateDir) -> Result<()> {
    let pid = supervisor::stop(state_dir)?;
    println!("Sent stop signal to worker supervisor (pid {pid}).");
    Ok(())
}

/// Entry point of a spawned worker process (hidden `worker run`).
pub fn run_loop(
    state_dir: &StateDir,
    index: u32,
    max_retries: u32,
    backoff_base: u32,
) -> Result<()> {
    let stop_flag = supervisor::install_stop_handlers()?;
    let store = Store::open(state_dir.db_path())?;
    let config = Config {
        max_retries,
        backoff_base,
    };

    Worker::new(store, config, index).run(stop_flag);
    Ok(())
}

/// Builds the argument list the supervisor passes to every worker process.
fn worker_args(state_dir: &StateDir, config: Config) -> Vec<String> {
    vec![
        "--state-dir".to_string(),
        state_dir.root().display().to_string(),
        "worker".to_string(),
        "run".to_string(),
        "--max-retries".to_string(),
        config.max_retries.to_string(),
        "--backoff-base".to_string(),
        config.backoff_base.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_worker_args_carry_state_dir_and_config() {
        let dir = TempDir::new().unwrap();
        let state_dir = StateDir::at(dir.path());
        let config = Config {
            max_retries: 5,
            backoff_base: 3,
        };

        let args = worker_args(&state_dir, config);
        assert_eq!(args[0], "--state-dir");
        assert_eq!(args[1], dir.path().display().to_string());
        assert_eq!(
            &args[2..],
            &[
                "worker",
                "run",
                "--max-retries",
                "5",
                "--backoff-base",
                "3"
            ]
        );
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let dir = TempDir::new().unwrap();
        let state_dir = StateDir::at(dir.path());
        assert!(start(&state_dir, 0).is_err());
    }
}
