//! Go test and coverage orchestration.
//!
//! The per-function coverage pipeline is two commands sharing a temporary profile:
//! `go test <target> -coverprofile <profile>` followed by
//! `go tool cover -func <profile>`. The report step runs whenever the test step ran
//! to completion, whatever its exit status, because a run with failing tests still
//! writes a usable profile. The result is a tagged [`CoverageOutcome`].

use crate::runner::{CommandResult, CommandRunner, ExecutionError, Invocation};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// `go` pattern matching every package below the workspace root.
pub const ALL_PACKAGES: &str = "./...";

/// How `analyze_coverage` reports coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageMode {
    /// `go test -cover`: one summary line per package
    #[default]
    Summary,
    /// Profile plus `go tool cover -func`: per-function breakdown
    Func,
}

impl CoverageMode {
    /// Unknown or missing modes fall back to [`CoverageMode::Summary`].
    pub fn parse(requested: Option<&str>) -> Self {
        match requested.map(str::trim) {
            Some("func") => CoverageMode::Func,
            _ => CoverageMode::Summary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageMode::Summary => "summary",
            CoverageMode::Func => "func",
        }
    }
}

impl fmt::Display for CoverageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a requested package target.
///
/// An empty request means every package. `.` (or `./`) in a workspace whose root
/// holds no Go sources is rewritten to [`ALL_PACKAGES`], since testing the root alone
/// would be a no-op for a workspace organized into subdirectories.
pub fn normalize_target(workspace: &Path, requested: Option<&str>) -> String {
    let target = requested.map(str::trim).unwrap_or_default();
    if target.is_empty() {
        return ALL_PACKAGES.to_string();
    }
    if matches!(target, "." | "./") {
        match dir_has_go_files(workspace) {
            Ok(false) => {
                debug!("No Go files in {:?}, testing {ALL_PACKAGES}", workspace);
                return ALL_PACKAGES.to_string();
            }
            Ok(true) => {}
            Err(e) => warn!("Could not list workspace {:?}: {e}", workspace),
        }
    }
    target.to_string()
}

fn dir_has_go_files(dir: &Path) -> std::io::Result<bool> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        if entry.file_name().to_string_lossy().ends_with(".go") {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Outcome of the per-function coverage pipeline.
#[derive(Debug)]
pub enum CoverageOutcome {
    /// The test step could not run; no report was attempted.
    TotalFailure { error: CoverageError },
    /// The test step ran but the report step could not.
    Partial {
        test: CommandResult,
        error: CoverageError,
    },
    /// Both steps ran to completion.
    Complete {
        test: CommandResult,
        cover: CommandResult,
    },
}

impl CoverageOutcome {
    pub fn test(&self) -> Option<&CommandResult> {
        match self {
            CoverageOutcome::TotalFailure { .. } => None,
            CoverageOutcome::Partial { test, .. } | CoverageOutcome::Complete { test, .. } => {
                Some(test)
            }
        }
    }

    pub fn cover(&self) -> Option<&CommandResult> {
        match self {
            CoverageOutcome::Complete { cover, .. } => Some(cover),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CoverageError> {
        match self {
            CoverageOutcome::TotalFailure { error } | CoverageOutcome::Partial { error, .. } => {
                Some(error)
            }
            CoverageOutcome::Complete { .. } => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    #[error("create coverage profile: {0}")]
    Profile(#[source] std::io::Error),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// JSON payload returned by `analyze_coverage`.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub target: String,
    pub mode: CoverageMode,
    pub test: CommandResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<CommandResult>,
}

/// JSON payload returned by `run_tests`.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub target: String,
    pub result: CommandResult,
}

/// Runs the Go toolchain through a [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct CoverageOrchestrator {
    runner: CommandRunner,
    go_bin: String,
}

impl CoverageOrchestrator {
    pub fn new(runner: CommandRunner, go_bin: impl Into<String>) -> Self {
        Self {
            runner,
            go_bin: go_bin.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        self.runner.workspace()
    }

    /// `go test <target>`
    pub async fn run_tests(
        &self,
        invocation: &Invocation,
        target: &str,
    ) -> Result<CommandResult, ExecutionError> {
        self.runner
            .run(invocation, &self.go_bin, &["test", target])
            .await
    }

    /// `go test <target> -cover`
    pub async fn summary(
        &self,
        invocation: &Invocation,
        target: &str,
    ) -> Result<CommandResult, ExecutionError> {
        self.runner
            .run(invocation, &self.go_bin, &["test", target, "-cover"])
            .await
    }

    /// Test with a coverage profile, then render the profile per function.
    ///
    /// The profile lives in a temporary file that is deleted when this returns,
    /// on every path.
    pub async fn by_function(&self, invocation: &Invocation, target: &str) -> CoverageOutcome {
        let profile = match tempfile::Builder::new()
            .prefix("coverage-")
            .suffix(".out")
            .tempfile()
        {
            Ok(file) => file.into_temp_path(),
            Err(e) => {
                return CoverageOutcome::TotalFailure {
                    error: CoverageError::Profile(e),
                };
            }
        };
        let profile_path = profile.to_string_lossy().into_owned();
        debug!(id = %invocation.id, "Coverage profile at {profile_path}");

        let test = match self
            .runner
            .run(
                invocation,
                &self.go_bin,
                &["test", target, "-coverprofile", profile_path.as_str()],
            )
            .await
        {
            Ok(test) => test,
            Err(e) => {
                return CoverageOutcome::TotalFailure {
                    error: CoverageError::Execution(e),
                };
            }
        };

        let outcome = match self
            .runner
            .run(
                invocation,
                &self.go_bin,
                &["tool", "cover", "-func", profile_path.as_str()],
            )
            .await
        {
            Ok(cover) => CoverageOutcome::Complete { test, cover },
            Err(e) => CoverageOutcome::Partial {
                test,
                error: CoverageError::Execution(e),
            },
        };

        if let Err(e) = profile.close() {
            warn!(id = %invocation.id, "Failed to remove coverage profile {profile_path}: {e}");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing_defaults_to_summary() {
        assert_eq!(CoverageMode::parse(Some("func")), CoverageMode::Func);
        assert_eq!(CoverageMode::parse(Some("summary")), CoverageMode::Summary);
        assert_eq!(CoverageMode::parse(Some("html")), CoverageMode::Summary);
        assert_eq!(CoverageMode::parse(Some("")), CoverageMode::Summary);
        assert_eq!(CoverageMode::parse(None), CoverageMode::Summary);
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_value(CoverageMode::Func).unwrap(), "func");
        assert_eq!(CoverageMode::Summary.to_string(), "summary");
    }

    #[test]
    fn test_empty_target_means_all_packages() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(normalize_target(dir.path(), None), ALL_PACKAGES);
        assert_eq!(normalize_target(dir.path(), Some("   ")), ALL_PACKAGES);
    }

    #[test]
    fn test_dot_without_root_sources_becomes_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg").join("lib.go"), "package pkg\n").unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/x\n").unwrap();

        assert_eq!(normalize_target(dir.path(), Some(".")), ALL_PACKAGES);
        assert_eq!(normalize_target(dir.path(), Some("./")), ALL_PACKAGES);
    }

    #[test]
    fn test_dot_with_root_sources_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.go"), "package main\n").unwrap();

        assert_eq!(normalize_target(dir.path(), Some(".")), ".");
        assert_eq!(normalize_target(dir.path(), Some(" ./ ")), "./");
    }

    #[test]
    fn test_directory_named_like_a_source_does_not_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("vendor.go")).unwrap();
        assert_eq!(normalize_target(dir.path(), Some(".")), ALL_PACKAGES);
    }

    #[test]
    fn test_explicit_targets_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(normalize_target(dir.path(), Some("./pkg/...")), "./pkg/...");
        assert_eq!(
            normalize_target(dir.path(), Some("example.com/x/pkg")),
            "example.com/x/pkg"
        );
    }

    #[test]
    fn test_unreadable_workspace_keeps_target() {
        let missing = Path::new("/definitely/not/a/workspace/42");
        assert_eq!(normalize_target(missing, Some(".")), ".");
    }

    #[test]
    fn test_report_omits_missing_cover() {
        let result = CommandResult {
            command: "go test ./... -cover".to_string(),
            stdout: "ok".to_string(),
            stderr: String::new(),
            exit_code: 0,
            success: true,
            duration_ms: 5,
        };
        let report = CoverageReport {
            target: ALL_PACKAGES.to_string(),
            mode: CoverageMode::Summary,
            test: result,
            cover: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["target"], "./...");
        assert_eq!(json["mode"], "summary");
        assert_eq!(json["test"]["exit_code"], 0);
        assert!(json.get("cover").is_none());
    }

    #[tokio::test]
    async fn test_missing_toolchain_is_total_failure() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = CoverageOrchestrator::new(
            CommandRunner::new(dir.path()),
            "definitely-not-a-go-toolchain-42",
        );

        let outcome = orchestrator
            .by_function(&Invocation::detached(), ALL_PACKAGES)
            .await;
        assert!(matches!(outcome, CoverageOutcome::TotalFailure { .. }));
        assert!(outcome.test().is_none());
        assert!(outcome.cover().is_none());
        assert!(outcome.error().is_some());
    }
}
