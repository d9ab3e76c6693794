//! Worker supervision: pidfile ownership, signal handling, spawn and join.
//!
//! The supervisor is the foreground parent process behind `worker start`. It
//! writes its own PID to the pidfile, spawns the requested number of worker
//! processes, and blocks until they have all exited. `SIGINT` and `SIGTERM`
//! both set a process-wide stop flag; once the flag is up the supervisor
//! forwards `SIGTERM` to every live worker exactly once and keeps joining.
//! Worker processes install the same handlers, so the flag each worker polls
//! at its loop boundaries is set by native signal delivery - a pending
//! signal cannot be missed, and shutdown latency is bounded by one job
//! duration plus the poll interval.
//!
//! A worker that exits early is terminal for that worker only; the
//! supervisor does not respawn it and keeps supervising the rest.

use std::path::Path;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::StateDir;

/// How often the join loop polls for exited workers and the stop flag.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Process-wide stop flag, set by the signal handler.
static STOP_FLAG: AtomicBool = AtomicBool::new(false);

extern "C" fn on_stop_signal(_signal: nix::libc::c_int) {
    // Only async-signal-safe work here: a single atomic store, idempotent
    // under repeated delivery.
    STOP_FLAG.store(true, Ordering::SeqCst);
}

/// Installs `SIGINT`/`SIGTERM` handlers that set the stop flag.
///
/// Returns the flag so callers can poll it. Both the supervisor and each
/// worker process call this on startup.
///
/// # Errors
///
/// Returns an error if the handlers cannot be installed.
#[allow(unsafe_code)] // sigaction requires unsafe
pub fn install_stop_handlers() -> Result<&'static AtomicBool, SupervisorError> {
    let action = SigAction::new(
        SigHandler::Handler(on_stop_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );

    // SAFETY: the handler only performs an atomic store, which is
    // async-signal-safe.
    unsafe {
        signal::sigaction(Signal::SIGINT, &action)?;
        signal::sigaction(Signal::SIGTERM, &action)?;
    }

    Ok(&STOP_FLAG)
}

/// Errors from supervision and pidfile handling.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// A supervisor is already running according to the pidfile.
    #[error("workers already running (supervisor pid {pid})")]
    AlreadyRunning {
        /// PID recorded in the pidfile.
        pid: i32,
    },

    /// No pidfile exists; there is nothing to stop.
    #[error("workers are not running (no pidfile)")]
    NotRunning,

    /// The pidfile names a process that is no longer alive.
    #[error("stale pidfile: process {pid} is not running")]
    Stale {
        /// PID recorded in the pidfile.
        pid: i32,
    },

    /// No worker process could be started.
    #[error("no worker processes could be started")]
    NoWorkersStarted,

    /// Signal installation or delivery failed.
    #[error("signal error: {0}")]
    Signal(#[from] nix::Error),

    /// I/O error around the pidfile or spawning.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Describes how to launch one worker process.
///
/// The supervisor re-invokes an executable (normally the current one) with a
/// fixed argument list and appends `--index <n>` per worker. Retry
/// configuration travels on the command line, so workers never re-read the
/// config file mid-run.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    program: std::path::PathBuf,
    args: Vec<String>,
}

impl WorkerSpec {
    /// Creates a spec from an explicit program and argument list.
    pub fn new(program: impl Into<std::path::PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Creates a spec that re-invokes the current executable.
    ///
    /// # Errors
    ///
    /// Returns an error if the current executable path cannot be determined.
    pub fn current_exe(args: Vec<String>) -> std::io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args,
        })
    }

    /// The arguments a worker with this index would receive.
    #[must_use]
    pub fn args_for(&self, index: u32) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--index".to_string());
        args.push(index.to_string());
        args
    }

    /// Spawns the worker process for `index`, inheriting standard streams.
    fn spawn(&self, index: u32) -> std::io::Result<Child> {
        Command::new(&self.program).args(self.args_for(index)).spawn()
    }
}

/// The parent process that owns the pidfile and the worker pool.
pub struct Supervisor {
    state_dir: StateDir,
    spec: WorkerSpec,
    count: u32,
}

impl Supervisor {
    /// Creates a supervisor that will run `count` workers.
    #[must_use]
    pub fn new(state_dir: StateDir, spec: WorkerSpec, count: u32) -> Self {
        Self {
            state_dir,
            spec,
            count,
        }
    }

    /// Runs the supervisor in the foreground until all workers have joined.
    ///
    /// Fails up front with [`SupervisorError::AlreadyRunning`] when the
    /// pidfile names a live process; a stale pidfile is replaced. The
    /// pidfile is removed once the last worker has exited.
    ///
    /// # Errors
    ///
    /// Returns an error if another supervisor is running, if signal handlers
    /// cannot be installed, if the pidfile cannot be written, or if not a
    /// single worker could be spawned.
    pub fn run(&self) -> Result<(), SupervisorError> {
        let pid_path = self.state_dir.pid_path();
        if let Some(pid) = read_pid_file(&pid_path) {
            if pid_is_alive(pid) {
                return Err(SupervisorError::AlreadyRunning { pid });
            }
            warn!(pid, "removing stale pidfile");
        }

        self.state_dir.ensure()?;
        write_pid_file(&pid_path)?;
        let stop = install_stop_handlers()?;

        let mut children: Vec<(u32, Child)> = Vec::new();
        for index in 0..self.count {
            match self.spec.spawn(index) {
                Ok(child) => {
                    info!(worker = index, pid = child.id(), "spawned worker");
                    children.push((index, child));
                },
                Err(err) => {
                    error!(worker = index, error = %err, "failed to spawn worker");
                },
            }
        }

        if children.is_empty() {
            remove_pid_file(&pid_path);
            return Err(SupervisorError::NoWorkersStarted);
        }

        join_workers(&mut children, stop);

        remove_pid_file(&pid_path);
        info!("all workers stopped");
        Ok(())
    }
}

/// Blocks until every child has exited, relaying the stop signal once.
fn join_workers(children: &mut Vec<(u32, Child)>, stop: &AtomicBool) {
    let mut notified = false;

    while !children.is_empty() {
        if stop.load(Ordering::SeqCst) && !notified {
            info!("stop signal received, notifying workers");
            for (index, child) in children.iter() {
                if let Err(err) = kill_pid(child.id(), Signal::SIGTERM) {
                    warn!(worker = *index, error = %err, "failed to signal worker");
                }
            }
            notified = true;
        }

        children.retain_mut(|(index, child)| match child.try_wait() {
            Ok(Some(status)) => {
                info!(worker = *index, status = %status, "worker exited");
                false
            },
            Ok(None) => true,
            Err(err) => {
                warn!(worker = *index, error = %err, "failed to poll worker");
                false
            },
        });

        if !children.is_empty() {
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }
    }
}

/// Signals the running supervisor to stop, without waiting for it to exit.
///
/// Returns the signalled PID. A stale pidfile is removed on the way out.
///
/// # Errors
///
/// Returns [`SupervisorError::NotRunning`] when no pidfile exists,
/// [`SupervisorError::Stale`] when the recorded process is gone, or a signal
/// delivery error.
pub fn stop(state_dir: &StateDir) -> Result<i32, SupervisorError> {
    let pid_path = state_dir.pid_path();
    let pid = read_pid_file(&pid_path).ok_or(SupervisorError::NotRunning)?;

    if !pid_is_alive(pid) {
        remove_pid_file(&pid_path);
        return Err(SupervisorError::Stale { pid });
    }

    signal::kill(Pid::from_raw(pid), Signal::SIGTERM)?;
    Ok(pid)
}

/// PID of the live supervisor, if one is running.
#[must_use]
pub fn running_pid(state_dir: &StateDir) -> Option<i32> {
    read_pid_file(&state_dir.pid_path()).filter(|pid| pid_is_alive(*pid))
}

/// Writes the current process id to the pidfile.
fn write_pid_file(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, std::process::id().to_string())?;
    info!(path = %path.display(), "pidfile written");
    Ok(())
}

/// Reads the pidfile; `None` when absent or unparseable.
fn read_pid_file(path: &Path) -> Option<i32> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// Removes the pidfile, ignoring a file that is already gone.
fn remove_pid_file(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove pidfile");
        }
    }
}

/// Whether a process with this pid exists (signal 0 probe).
fn pid_is_alive(pid: i32) -> bool {
    signal::kill(Pid::from_raw(pid), None).is_ok()
}

/// Sends `sig` to a child process id.
#[allow(clippy::cast_possible_wrap)] // child pids fit in i32
fn kill_pid(pid: u32, sig: Signal) -> nix::Result<()> {
    signal::kill(Pid::from_raw(pid as i32), sig)
}
