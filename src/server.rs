//! The MCP stdio server backing the lifecycle controller.

use crate::config::Config;
use crate::coverage::CoverageOrchestrator;
use crate::lifecycle::{ServiceError, ServiceRunner};
use crate::progress::ProgressReporter;
use crate::runner::{CommandRunner, ExecutionError, Invocation};
use crate::tools::GoTools;
use async_trait::async_trait;
use rmcp::{ServiceExt, transport::stdio};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_GOPLS: &str = "gopls";

pub struct GoplsService {
    config: Config,
    workspace: PathBuf,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl GoplsService {
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        let workspace =
            config
                .workspace
                .canonicalize()
                .map_err(|source| ServiceError::Workspace {
                    path: config.workspace.clone(),
                    source,
                })?;
        Ok(Self {
            config,
            workspace,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Factory entry point for the lifecycle controller.
    pub fn create(config: Config) -> Result<Box<dyn ServiceRunner>, ServiceError> {
        Ok(Box::new(Self::new(config)?))
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// One-line description of the gopls installation for the server instructions.
    ///
    /// A missing or broken gopls only degrades the description; Go tests run through
    /// the toolchain and do not need it. Cancelling `cancel` stops the probe at once.
    pub async fn probe_gopls(&self, cancel: CancellationToken) -> String {
        let program = self
            .config
            .gopls_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_GOPLS.to_string());
        let runner = CommandRunner::new(&self.workspace);
        let invocation = Invocation::new(ProgressReporter::silent(), cancel.child_token());
        let _done = invocation.cancel.clone().drop_guard();

        let probe = runner.run(&invocation, &program, &["version"]);
        match tokio::time::timeout(self.config.rpc_timeout, probe).await {
            Ok(Ok(result)) if result.success => {
                let version = result.stdout.lines().next().unwrap_or_default().trim();
                info!("Using {program}: {version}");
                format!("gopls: {version}")
            }
            Ok(Ok(result)) => {
                warn!("`{program} version` exited with status {}", result.exit_code);
                format!("gopls: unavailable (exit status {})", result.exit_code)
            }
            Ok(Err(ExecutionError::Cancelled { .. })) => {
                debug!("gopls probe cancelled");
                "gopls: probe cancelled".to_string()
            }
            Ok(Err(e)) => {
                warn!("gopls probe failed: {e}");
                "gopls: not found".to_string()
            }
            Err(_) => {
                warn!(
                    "`{program} version` did not answer within {:?}",
                    self.config.rpc_timeout
                );
                "gopls: not responding".to_string()
            }
        }
    }

    fn tools(&self, shutdown: CancellationToken) -> GoTools {
        let runner = CommandRunner::new(&self.workspace);
        GoTools::new(
            CoverageOrchestrator::new(runner, self.config.go_bin.clone()),
            shutdown,
        )
    }
}

#[async_trait]
impl ServiceRunner for GoplsService {
    async fn start(&self, token: CancellationToken) -> Result<(), ServiceError> {
        // Cancelled by either the root token or close().
        let session = token.child_token();
        let on_close = self.shutdown.clone();
        let linked = session.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = on_close.cancelled() => linked.cancel(),
                _ = linked.cancelled() => {}
            }
        });

        let availability = self.probe_gopls(session.clone()).await;
        let tools = self.tools(session.clone()).with_availability(availability);
        info!(workspace = ?self.workspace, "Serving MCP over stdio");

        let running = tokio::select! {
            biased;
            _ = session.cancelled() => {
                info!("Shutdown requested before the client initialized");
                return Ok(());
            }
            served = tools.serve_with_ct(stdio(), session.clone()) => {
                served.map_err(|e| ServiceError::Handshake(e.to_string()))?
            }
        };

        let reason = running.waiting().await?;
        info!("MCP session ended: {reason:?}");
        // Kill anything still running for this session.
        session.cancel();
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("gopls service already closed");
            return;
        }
        info!("Closing gopls service");
        self.shutdown.cancel();
    }
}
