//! External command execution.
//!
//! [`CommandRunner`] runs one program in the workspace and captures its output. A
//! process that runs to completion is always an `Ok(CommandResult)`, even when its
//! exit status is non-zero: failing tests are a result, not an error. Only a process
//! that could not be started, could not be waited on, was killed by a signal, or
//! was cancelled yields an [`ExecutionError`].

use crate::progress::ProgressReporter;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Captured outcome of one external process run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
}

/// The process could not be run, or did not run to completion.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("failed to collect output of `{command}`: {source}")]
    Io {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` was terminated by a signal")]
    Terminated { command: String },

    #[error("`{command}` was cancelled")]
    Cancelled { command: String },
}

/// Per-call context shared by every command of one tool invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Short id used to correlate log lines of one invocation
    pub id: String,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
}

impl Invocation {
    pub fn new(progress: ProgressReporter, cancel: CancellationToken) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            progress,
            cancel,
        }
    }

    /// An invocation with no progress destination that is never cancelled.
    pub fn detached() -> Self {
        Self::new(ProgressReporter::silent(), CancellationToken::new())
    }
}

/// Runs programs with the workspace as working directory.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    workspace: PathBuf,
}

impl CommandRunner {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Run `program args...`, bracketed by "started" and "finished" progress messages.
    pub async fn run<S: AsRef<str>>(
        &self,
        invocation: &Invocation,
        program: &str,
        args: &[S],
    ) -> Result<CommandResult, ExecutionError> {
        let command = display_command(program, args);
        invocation
            .progress
            .report(format!("Starting: {command}"))
            .await;

        let result = self.execute(invocation, program, args, &command).await;

        let finished = match &result {
            Ok(output) if output.success => {
                format!("Finished: {command} ({}ms)", output.duration_ms)
            }
            Ok(output) => format!(
                "Finished: {command} exited with status {} ({}ms)",
                output.exit_code, output.duration_ms
            ),
            Err(e) => format!("Finished: {e}"),
        };
        invocation.progress.report(finished).await;
        result
    }

    async fn execute<S: AsRef<str>>(
        &self,
        invocation: &Invocation,
        program: &str,
        args: &[S],
        command: &str,
    ) -> Result<CommandResult, ExecutionError> {
        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(AsRef::as_ref))
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(id = %invocation.id, dir = ?self.workspace, "Spawning {command}");
        let started_at = Instant::now();
        let child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
            command: command.to_string(),
            source,
        })?;

        // Dropping the wait future on cancellation drops the child, which kills it.
        let waited = tokio::select! {
            output = child.wait_with_output() => output,
            _ = invocation.cancel.cancelled() => {
                warn!(id = %invocation.id, "Cancelled {command}");
                return Err(ExecutionError::Cancelled { command: command.to_string() });
            }
        };
        let output = waited.map_err(|source| ExecutionError::Io {
            command: command.to_string(),
            source,
        })?;

        let duration_ms = started_at.elapsed().as_millis() as u64;
        let exit_code = output
            .status
            .code()
            .ok_or_else(|| ExecutionError::Terminated {
                command: command.to_string(),
            })?;

        info!(
            id = %invocation.id,
            exit_code,
            duration_ms,
            "Completed {command}"
        );

        Ok(CommandResult {
            command: command.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
            success: output.status.success(),
            duration_ms,
        })
    }
}

fn display_command<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .collect::<Vec<_>>()
        .join(" ")
}
