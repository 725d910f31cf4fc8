//! Logging initialization utilities.
//!
//! Provides a single entry point `init_subscriber` that configures tracing for either
//! stderr (default) or an append-only log file, in text or JSON format. Stdout is
//! reserved for the MCP transport, so logs never go there.
//! The function is idempotent: subsequent calls after the first are no-ops so tests
//! or library reuse won't panic on duplicate initialization.

use crate::config::{Config, LogLevel};
use std::{fs, path::PathBuf, sync::Once};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// The subset of [`Config`] that drives logging.
#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    pub file: Option<PathBuf>,
    pub level: LogLevel,
    pub json: bool,
}

impl From<&Config> for LogSettings {
    fn from(config: &Config) -> Self {
        Self {
            file: config.log_file.clone(),
            level: config.log_level,
            json: config.log_json,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level when set. When a log file is configured
/// the returned guard must be kept alive for the program lifetime to ensure flushing.
pub fn init_subscriber(settings: &LogSettings) -> Option<WorkerGuard> {
    let mut guard = None;
    // Only allow one-time initialization; ignore later calls.
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));

        if let Some(path) = &settings.file {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            if let Err(e) = fs::create_dir_all(&dir) {
                eprintln!("Failed to create log dir {:?}: {e}", dir);
            }
            let file_name = path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("mcp-gopls.log"));
            let file_appender = tracing_appender::rolling::never(&dir, file_name);
            let (nb, worker_guard) = tracing_appender::non_blocking(file_appender);
            guard = Some(worker_guard);

            let builder = fmt()
                .with_env_filter(env_filter)
                .with_writer(nb)
                .with_ansi(false)
                .with_target(false);
            if settings.json {
                builder.json().init();
            } else {
                builder.init();
            }
            tracing::debug!(
                "Logging initialized (file mode) level={} json={} path={:?}",
                settings.level,
                settings.json,
                path
            );
            return;
        }

        let builder = fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false);
        if settings.json {
            builder.with_ansi(false).json().init();
        } else {
            builder.with_ansi(true).init();
        }
        tracing::debug!(
            "Logging initialized (stderr mode) level={} json={}",
            settings.level,
            settings.json
        );
    });
    guard
}
