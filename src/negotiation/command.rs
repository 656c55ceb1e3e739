//! Bounded, cancellable execution of a converter process.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default control-operation timeout (`ping`, `describe`).
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default conversion timeout: 5 minutes.
pub const DEFAULT_CONVERT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from a finished process, successful or not.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// The process could not be run to completion.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error waiting for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// A builder for one invocation of a converter executable.
///
/// Unlike a plain `Command`, a non-zero exit is *not* an error here: the
/// negotiation protocol gives meaning to exit status and body separately, so
/// callers inspect [`ToolOutput`] themselves.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_CONTROL_TIMEOUT,
        }
    }

    /// Paths are passed through unchanged, including non-UTF-8 names.
    pub fn arg(&mut self, s: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(s.as_ref().to_os_string());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl AsRef<OsStr>>) -> &mut Self {
        self.args
            .extend(iter.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Run the process to completion, capturing stdout and stderr.
    ///
    /// The child is killed when the timeout fires or `cancel` is triggered.
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<ToolOutput, CommandError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(CommandError::Spawn)?;

        // Dropping the `wait_with_output` future drops the child, which
        // kill_on_drop turns into SIGKILL.
        tokio::select! {
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(Ok(output)) => Ok(ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }),
                Ok(Err(e)) => Err(CommandError::Wait(e)),
                Err(_elapsed) => Err(CommandError::TimedOut(self.timeout)),
            },
            _ = cancel.cancelled() => Err(CommandError::Cancelled),
        }
    }
}
