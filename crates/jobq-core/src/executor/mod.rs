//! Runs one job's command as a child process.
//!
//! Commands go through the platform shell so pipes and redirects work; the
//! queue treats the command string as opaque. Children inherit the worker's
//! standard streams - job output is not captured or persisted. The call
//! blocks until the child exits.

use std::process::{Command, Stdio};

/// Classified result of executing a job command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The child exited with status zero.
    Success,
    /// Anything else: non-zero exit, spawn error, or signal termination.
    Failure {
        /// Short diagnostic, e.g. `exit code 1`.
        reason: String,
    },
}

impl Outcome {
    /// Builds a failure outcome from a diagnostic string.
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }
}

/// Executes `command` via `sh -c` and classifies the result.
///
/// Never returns an error: every anomaly becomes a [`Outcome::Failure`] so
/// the caller can route it through the retry policy.
#[must_use]
pub fn execute(command: &str) -> Outcome {
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(err) => return Outcome::failure(format!("spawn failed: {err}")),
    };

    match child.wait() {
        Ok(status) if status.success() => Outcome::Success,
        Ok(status) => Outcome::failure(describe_status(status)),
        Err(err) => Outcome::failure(format!("wait failed: {err}")),
    }
}

/// Renders a non-success exit status as a short diagnostic.
fn describe_status(status: std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(signal)) => format!("terminated by signal {signal}"),
        (None, None) => "exited abnormally".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[test]
    fn test_zero_exit_is_success() {
        assert_eq!(execute("true"), Outcome::Success);
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[test]
    fn test_nonzero_exit_is_failure() {
        let Outcome::Failure { reason } = execute("exit 3") else {
            panic!("expected failure");
        };
        assert_eq!(reason, "exit code 3");
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[test]
    fn test_shell_features_work() {
        assert_eq!(execute("echo hi | grep -q hi"), Outcome::Success);
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[test]
    fn test_signal_termination_is_failure() {
        let Outcome::Failure { reason } = execute("kill -TERM $$") else {
            panic!("expected failure");
        };
        assert!(reason.contains("signal"), "unexpected reason: {reason}");
    }
}
