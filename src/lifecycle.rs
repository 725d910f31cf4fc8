//! Process lifecycle: construct the backing service, run it until a shutdown signal,
//! and tear it down exactly once within the configured deadline.
//!
//! The service and the signal source are both injected, so the controller can be
//! driven by stubs in tests without touching process-wide state.

use crate::config::Config;
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Printed on stdout once a clean shutdown has finished.
pub const SHUTDOWN_COMPLETE: &str = "mcp-gopls shutdown complete";

/// A long-running backing service.
#[async_trait]
pub trait ServiceRunner: Send + Sync {
    /// Run until `token` is cancelled or an unrecoverable error occurs.
    async fn start(&self, token: CancellationToken) -> Result<(), ServiceError>;

    /// Release the service's resources. Must be idempotent.
    async fn close(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("workspace {path:?}: {source}")]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("MCP initialization failed: {0}")]
    Handshake(String),

    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("create service: {0}")]
    Create(#[source] ServiceError),

    #[error("install signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    #[error("service error: {0}")]
    Service(#[source] ServiceError),

    #[error("write completion message: {0}")]
    Output(#[source] std::io::Error),
}

/// Builds the backing service from the validated configuration.
pub trait ServiceFactory: Send + Sync {
    fn create(&self, config: Config) -> Result<Box<dyn ServiceRunner>, ServiceError>;
}

impl<F> ServiceFactory for F
where
    F: Fn(Config) -> Result<Box<dyn ServiceRunner>, ServiceError> + Send + Sync,
{
    fn create(&self, config: Config) -> Result<Box<dyn ServiceRunner>, ServiceError> {
        self(config)
    }
}

/// Produces the root cancellation token of the process.
pub trait ShutdownSignal: Send + Sync {
    fn install(&self) -> std::io::Result<CancellationToken>;
}

/// Cancels on Ctrl+C and, on Unix, on SIGTERM.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSignals;

impl ShutdownSignal for OsSignals {
    fn install(&self) -> std::io::Result<CancellationToken> {
        let token = CancellationToken::new();
        let trigger = token.clone();

        #[cfg(unix)]
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::spawn(async move {
            #[cfg(unix)]
            tokio::select! {
                interrupted = tokio::signal::ctrl_c() => match interrupted {
                    Ok(()) => info!("Received SIGINT, shutting down"),
                    Err(e) => {
                        warn!("Failed to listen for SIGINT: {e}");
                        return;
                    }
                },
                _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
                _ = trigger.cancelled() => return,
            }

            #[cfg(not(unix))]
            tokio::select! {
                interrupted = tokio::signal::ctrl_c() => match interrupted {
                    Ok(()) => info!("Received Ctrl+C, shutting down"),
                    Err(e) => {
                        warn!("Failed to listen for Ctrl+C: {e}");
                        return;
                    }
                },
                _ = trigger.cancelled() => return,
            }

            trigger.cancel();
        });

        Ok(token)
    }
}

/// Owns the service and guarantees close runs at most once.
struct ServiceHandle {
    runner: Box<dyn ServiceRunner>,
    closed: OnceCell<()>,
}

impl ServiceHandle {
    fn new(runner: Box<dyn ServiceRunner>) -> Self {
        Self {
            runner,
            closed: OnceCell::new(),
        }
    }

    async fn close(&self, deadline: Duration) {
        self.closed
            .get_or_init(|| async {
                debug!("Closing service (deadline {deadline:?})");
                if tokio::time::timeout(deadline, self.runner.close())
                    .await
                    .is_err()
                {
                    warn!("Service close did not finish within {deadline:?}");
                }
            })
            .await;
    }
}

pub struct LifecycleController<W> {
    factory: Box<dyn ServiceFactory>,
    signals: Box<dyn ShutdownSignal>,
    out: W,
}

impl<W: Write + Send> LifecycleController<W> {
    pub fn new(factory: Box<dyn ServiceFactory>, signals: Box<dyn ShutdownSignal>, out: W) -> Self {
        Self {
            factory,
            signals,
            out,
        }
    }

    /// Run the service until shutdown.
    ///
    /// The service is closed on every path once it has been constructed. The
    /// completion line is written only when `start` returned cleanly.
    pub async fn run(&mut self, config: Config) -> Result<(), LifecycleError> {
        let deadline = config.shutdown_timeout;
        let service = ServiceHandle::new(
            self.factory
                .create(config)
                .map_err(LifecycleError::Create)?,
        );

        let token = match self.signals.install() {
            Ok(token) => token,
            Err(e) => {
                service.close(deadline).await;
                return Err(LifecycleError::Signal(e));
            }
        };

        info!("Service starting");
        let started = service.runner.start(token.clone()).await;
        // Also releases the signal listener when the service stopped on its own.
        token.cancel();
        service.close(deadline).await;

        match started {
            Ok(()) => {
                info!("Service stopped");
                writeln!(self.out, "{SHUTDOWN_COMPLETE}").map_err(LifecycleError::Output)?;
                self.out.flush().map_err(LifecycleError::Output)?;
                Ok(())
            }
            Err(e) => {
                error!("Service failed: {e}");
                Err(LifecycleError::Service(e))
            }
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }
}
