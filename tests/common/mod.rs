#![allow(dead_code)]

use anyhow::Result;
use mcp_gopls::progress::{ProgressEvent, ProgressReporter, channel_notifier};
use mcp_gopls::runner::Invocation;
use rmcp::model::{NumberOrString, ProgressToken};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

/// Test step that writes a profile when asked to and passes.
pub const TESTS_PASS: &str = r#"echo "ok  	example.com/demo	0.012s	coverage: 75.0% of statements"
if [ "$3" = "-coverprofile" ]; then echo "mode: set" > "$4"; fi
exit 0"#;

/// Test step that writes a profile and then reports a failing test.
pub const TESTS_FAIL: &str = r#"echo "--- FAIL: TestAdd (0.00s)"
echo "FAIL	example.com/demo	0.010s"
if [ "$3" = "-coverprofile" ]; then echo "mode: set" > "$4"; fi
exit 1"#;

/// Report step that renders the profile it was given.
pub const COVER_REPORTS: &str = r#"cat "$4"
echo "example.com/demo/add.go:3:	Add		100.0%"
echo "total:				(statements)	75.0%""#;

/// Kills the current step, so it never exits with a status.
pub const KILLED: &str = "kill -9 $$";

/// A temporary Go workspace with a scripted `go` toolchain.
///
/// Every invocation of the fake toolchain appends its arguments to `calls.log`.
pub struct FakeGo {
    pub workspace: TempDir,
    pub bin: PathBuf,
    log: PathBuf,
}

impl FakeGo {
    pub fn new(test_step: &str, cover_step: &str) -> Result<Self> {
        let workspace = tempfile::Builder::new().prefix("mcp_gopls_ws_").tempdir()?;
        fs::write(workspace.path().join("go.mod"), "module example.com/demo\n")?;
        fs::write(
            workspace.path().join("add.go"),
            "package demo\n\nfunc Add(a, b int) int { return a + b }\n",
        )?;

        let log = workspace.path().join("calls.log");
        let bin = workspace.path().join("fake-go");
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> \"{log}\"\ncase \"$1\" in\ntest)\n{test_step}\n;;\ntool)\n{cover_step}\n;;\nesac\n",
            log = log.display()
        );
        fs::write(&bin, script)?;
        make_executable(&bin)?;

        Ok(Self {
            workspace,
            bin,
            log,
        })
    }

    pub fn path(&self) -> &Path {
        self.workspace.path()
    }

    pub fn bin_str(&self) -> String {
        self.bin.to_string_lossy().into_owned()
    }

    /// Argument lines of every toolchain call, in order.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Profile paths passed to the toolchain, taken from the last argument of
    /// `-coverprofile` and `-func` calls.
    pub fn profile_paths(&self) -> Vec<PathBuf> {
        self.calls()
            .iter()
            .filter(|line| line.contains("-coverprofile") || line.contains("-func"))
            .filter_map(|line| line.split_whitespace().last().map(PathBuf::from))
            .collect()
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// An invocation whose progress events land in the returned receiver.
pub fn traced_invocation() -> (Invocation, UnboundedReceiver<ProgressEvent>) {
    let (notifier, receiver) = channel_notifier();
    let token = ProgressToken(NumberOrString::Number(42));
    let progress = ProgressReporter::new(notifier, Some(token));
    (
        Invocation::new(progress, CancellationToken::new()),
        receiver,
    )
}

/// Drain every progress message received so far.
pub fn drain_messages(receiver: &mut UnboundedReceiver<ProgressEvent>) -> Vec<String> {
    let mut messages = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        messages.push(event.message.unwrap_or_default());
    }
    messages
}
