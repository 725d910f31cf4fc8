//! End-to-end tests against the built `mcp-gopls` binary over stdio.
#![cfg(unix)]

mod common;

use anyhow::Result;
use common::{COVER_REPORTS, FakeGo, TESTS_FAIL, TESTS_PASS};
use mcp_gopls::test_utils::{tool_json, tool_text};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParam,
    object,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{Duration, timeout};

const BIN: &str = env!("CARGO_BIN_EXE_mcp-gopls");

fn server_command(fake: &FakeGo) -> Command {
    Command::new(BIN).configure(|cmd| {
        cmd.arg("--workspace")
            .arg(fake.path())
            .arg("--go-bin")
            .arg(&fake.bin)
            .arg("--log-level")
            .arg("debug")
            .env_remove("RUST_LOG");
    })
}

#[tokio::test]
async fn test_lists_go_tools() -> Result<()> {
    let fake = FakeGo::new(TESTS_PASS, COVER_REPORTS)?;
    let client = ().serve(TokioChildProcess::new(server_command(&fake))?).await?;

    let mut names: Vec<String> = client
        .list_all_tools()
        .await?
        .iter()
        .map(|tool| tool.name.to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["analyze_coverage", "run_tests"]);

    let info = client.peer_info().expect("server info after initialize");
    let instructions = info.instructions.clone().unwrap_or_default();
    assert!(instructions.contains("gopls: "), "{instructions}");

    let _ = client.cancel().await;
    Ok(())
}

#[tokio::test]
async fn test_run_tests_over_mcp() -> Result<()> {
    let fake = FakeGo::new(TESTS_FAIL, COVER_REPORTS)?;
    let client = ().serve(TokioChildProcess::new(server_command(&fake))?).await?;

    let result = client
        .call_tool(CallToolRequestParam {
            name: "run_tests".into(),
            arguments: None,
        })
        .await?;

    assert_ne!(result.is_error, Some(true), "{}", tool_text(&result));
    let json = tool_json(&result).expect("test payload is JSON");
    assert_eq!(json["target"], "./...");
    assert_eq!(json["result"]["exit_code"], 1);
    assert!(
        json["result"]["stdout"]
            .as_str()
            .unwrap()
            .contains("--- FAIL: TestAdd")
    );

    let _ = client.cancel().await;
    Ok(())
}

#[tokio::test]
async fn test_analyze_coverage_func_over_mcp() -> Result<()> {
    let fake = FakeGo::new(TESTS_PASS, COVER_REPORTS)?;
    let client = ().serve(TokioChildProcess::new(server_command(&fake))?).await?;

    let result = client
        .call_tool(CallToolRequestParam {
            name: "analyze_coverage".into(),
            arguments: Some(object!({ "path": "./...", "output_format": "func" })),
        })
        .await?;

    assert_ne!(result.is_error, Some(true), "{}", tool_text(&result));
    let json = tool_json(&result).expect("coverage payload is JSON");
    assert_eq!(json["mode"], "func");
    assert!(
        json["cover"]["stdout"]
            .as_str()
            .unwrap()
            .contains("(statements)")
    );
    assert_eq!(fake.calls().len(), 2);
    assert!(fake.profile_paths().iter().all(|p| !p.exists()));

    let _ = client.cancel().await;
    Ok(())
}

#[tokio::test]
async fn test_sigterm_shuts_down_cleanly() -> Result<()> {
    let fake = FakeGo::new(TESTS_PASS, COVER_REPORTS)?;
    let mut child = Command::new(BIN)
        .arg("--workspace")
        .arg(fake.path())
        .arg("--go-bin")
        .arg(&fake.bin)
        .arg("--log-level")
        .arg("info")
        .arg("--shutdown-timeout")
        .arg("5s")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Signal handlers are installed before the server starts listening.
    let stderr = child.stderr.take().expect("piped stderr");
    let mut lines = BufReader::new(stderr).lines();
    let ready = timeout(Duration::from_secs(20), async {
        while let Ok(Some(line)) = lines.next_line().await {
            if line.contains("Serving MCP over stdio") {
                return true;
            }
        }
        false
    })
    .await?;
    assert!(ready, "server exited before serving");

    let pid = child.id().expect("running child has a pid");
    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()?;
    assert!(status.success());

    let exit = timeout(Duration::from_secs(20), child.wait()).await??;
    assert!(exit.success(), "expected a clean exit, got {exit:?}");

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_string(&mut stdout).await?;
    }
    assert_eq!(stdout.trim_end(), "mcp-gopls shutdown complete");
    Ok(())
}

#[tokio::test]
async fn test_invalid_configuration_exits_non_zero() -> Result<()> {
    let output = Command::new(BIN)
        .arg("--workspace")
        .arg("/definitely/not/a/workspace/42")
        .stdin(Stdio::null())
        .output()
        .await?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("workspace dir"), "{stderr}");
    assert!(output.stdout.is_empty());

    let output = Command::new(BIN)
        .args(["--shutdown-timeout", "0s"])
        .stdin(Stdio::null())
        .output()
        .await?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("shutdown-timeout must be positive"), "{stderr}");
    Ok(())
}
