//! MCP server exposing Go test and coverage tools over stdio.

use anyhow::Result;
use clap::Parser;
use mcp_gopls::{
    config::{Args, Config},
    lifecycle::{LifecycleController, OsSignals},
    logging::{LogSettings, init_subscriber},
    server::GoplsService,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env_and_args(args)?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_subscriber(&LogSettings::from(&config));

    info!(
        workspace = ?config.workspace,
        go_bin = %config.go_bin,
        rpc_timeout = ?config.rpc_timeout,
        shutdown_timeout = ?config.shutdown_timeout,
        "Starting mcp-gopls v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut controller = LifecycleController::new(
        Box::new(GoplsService::create),
        Box::new(OsSignals),
        std::io::stdout(),
    );
    controller.run(config).await?;
    Ok(())
}
