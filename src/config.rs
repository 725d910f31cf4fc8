//! Command-line and environment configuration.
//!
//! Every setting can be given as a flag or through an `MCP_GOPLS_*` environment
//! variable. Flags take precedence over the environment, which takes precedence over
//! the built-in defaults. The resulting [`Config`] is validated once at startup and
//! is immutable afterwards.

use clap::Parser;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_WORKSPACE: &str = "MCP_GOPLS_WORKSPACE";
pub const ENV_GOPLS_BIN: &str = "MCP_GOPLS_BIN";
pub const ENV_GO_BIN: &str = "MCP_GOPLS_GO_BIN";
pub const ENV_LOG_FILE: &str = "MCP_GOPLS_LOG_FILE";
pub const ENV_LOG_LEVEL: &str = "MCP_GOPLS_LOG_LEVEL";
pub const ENV_LOG_JSON: &str = "MCP_GOPLS_LOG_JSON";
pub const ENV_RPC_TIMEOUT: &str = "MCP_GOPLS_RPC_TIMEOUT";
pub const ENV_SHUTDOWN_TIMEOUT: &str = "MCP_GOPLS_SHUTDOWN_TIMEOUT";

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_GO_BIN: &str = "go";

/// Model Context Protocol bridge for Go test and coverage tooling
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "mcp-gopls",
    version = env!("CARGO_PKG_VERSION"),
    about = "MCP server running go test and coverage analysis for AI assistants",
    long_about = "A Model Context Protocol (MCP) server that runs `go test` and `go tool cover` \
                  against a local Go workspace and streams progress notifications while the \
                  commands run.\n\n\
                  Every flag can also be set through an MCP_GOPLS_* environment variable; \
                  flags take precedence."
)]
pub struct Args {
    /// Workspace root (default: current directory)
    #[arg(long, value_name = "DIR", help = "Workspace root (env MCP_GOPLS_WORKSPACE)")]
    pub workspace: Option<PathBuf>,

    /// Path to the gopls binary
    #[arg(long, value_name = "PATH", help = "Path to gopls binary (env MCP_GOPLS_BIN)")]
    pub gopls_path: Option<String>,

    /// Go toolchain program used to run tests
    #[arg(
        long,
        value_name = "PROGRAM",
        help = "Go toolchain program used for test and cover commands (env MCP_GOPLS_GO_BIN, default: go)"
    )]
    pub go_bin: Option<String>,

    /// Log file path (default: stderr)
    #[arg(long, value_name = "PATH", help = "Log file path (env MCP_GOPLS_LOG_FILE)")]
    pub log_file: Option<PathBuf>,

    /// Log level
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: debug, info, warn, error (env MCP_GOPLS_LOG_LEVEL, default: info)"
    )]
    pub log_level: Option<String>,

    /// Emit JSON logs
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        help = "Emit JSON logs; --log-json=false overrides the environment (env MCP_GOPLS_LOG_JSON)"
    )]
    pub log_json: Option<bool>,

    /// Timeout for gopls requests
    #[arg(
        long,
        value_name = "DURATION",
        allow_hyphen_values = true,
        help = "gopls RPC timeout, e.g. 45s (env MCP_GOPLS_RPC_TIMEOUT)"
    )]
    pub rpc_timeout: Option<String>,

    /// Graceful shutdown timeout
    #[arg(
        long,
        value_name = "DURATION",
        allow_hyphen_values = true,
        help = "Graceful shutdown timeout, e.g. 15s (env MCP_GOPLS_SHUTDOWN_TIMEOUT)"
    )]
    pub shutdown_timeout: Option<String>,
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::LogLevel(s.to_string())),
        }
    }
}

/// Errors raised while building the configuration. All of them are fatal and are
/// reported before any service is constructed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("workspace dir {path:?}: {source}")]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("workspace dir {0:?} is not a directory")]
    NotADirectory(PathBuf),

    #[error("determine current directory: {0}")]
    CurrentDir(std::io::Error),

    #[error("resolve gopls binary {0:?}: executable file not found")]
    ExecutableNotFound(String),

    #[error("stat gopls binary {path:?}: {source}")]
    ExecutableStat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("gopls binary {0:?} is a directory")]
    ExecutableIsDirectory(PathBuf),

    #[error("gopls binary {0:?} is not executable")]
    NotExecutable(PathBuf),

    #[error("parse log level: unknown log level {0:?}")]
    LogLevel(String),

    #[error("invalid {name} {value:?}: {source}")]
    Duration {
        name: &'static str,
        value: String,
        source: humantime::DurationError,
    },

    #[error("{name} must be positive, got {value}")]
    NonPositiveTimeout { name: &'static str, value: String },
}

/// Validated process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub workspace: PathBuf,
    /// Resolved gopls executable. `None` means "look up `gopls` on PATH when needed".
    pub gopls_path: Option<PathBuf>,
    pub go_bin: String,
    pub log_file: Option<PathBuf>,
    pub log_level: LogLevel,
    pub log_json: bool,
    pub rpc_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            gopls_path: None,
            go_bin: DEFAULT_GO_BIN.to_string(),
            log_file: None,
            log_level: LogLevel::Info,
            log_json: false,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl Config {
    /// Build the configuration from parsed flags and the process environment.
    pub fn from_env_and_args(args: Args) -> Result<Self, ConfigError> {
        Self::from_args(args, |key| std::env::var(key).ok())
    }

    /// Build the configuration from parsed flags, using `lookup` for environment
    /// fallbacks. Empty environment values count as unset.
    pub fn from_args<F>(args: Args, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let mut config = Config::default();

        match args.workspace.or_else(|| env(ENV_WORKSPACE).map(PathBuf::from)) {
            Some(dir) => {
                ensure_directory(&dir)?;
                config.workspace = dir;
            }
            None => {
                config.workspace = std::env::current_dir().map_err(ConfigError::CurrentDir)?;
            }
        }

        if let Some(program) = args.gopls_path.or_else(|| env(ENV_GOPLS_BIN)) {
            config.gopls_path = Some(resolve_executable(&program, env("PATH"))?);
        }

        if let Some(go_bin) = args.go_bin.or_else(|| env(ENV_GO_BIN)) {
            config.go_bin = go_bin;
        }

        config.log_file = args.log_file.or_else(|| env(ENV_LOG_FILE).map(PathBuf::from));
        config.log_json = args
            .log_json
            .unwrap_or_else(|| env(ENV_LOG_JSON).is_some_and(|v| is_truthy(&v)));

        if let Some(level) = args.log_level.or_else(|| env(ENV_LOG_LEVEL)) {
            config.log_level = level.parse()?;
        }

        config.rpc_timeout = duration_setting(
            "rpc-timeout",
            args.rpc_timeout,
            env(ENV_RPC_TIMEOUT),
            DEFAULT_RPC_TIMEOUT,
        )?;
        config.shutdown_timeout = duration_setting(
            "shutdown-timeout",
            args.shutdown_timeout,
            env(ENV_SHUTDOWN_TIMEOUT),
            DEFAULT_SHUTDOWN_TIMEOUT,
        )?;

        config.validate()?;
        Ok(config)
    }

    /// Check the timeout invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout {
                name: "rpc-timeout",
                value: humantime::format_duration(self.rpc_timeout).to_string(),
            });
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout {
                name: "shutdown-timeout",
                value: humantime::format_duration(self.shutdown_timeout).to_string(),
            });
        }
        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// A flag value must parse; an unparsable environment value falls back to `default`.
/// Negative values are rejected from either source.
fn duration_setting(
    name: &'static str,
    flag: Option<String>,
    env: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let effective = flag.as_deref().or(env.as_deref()).map(str::trim);
    if let Some(value) = effective.filter(|value| value.starts_with('-')) {
        return Err(ConfigError::NonPositiveTimeout {
            name,
            value: value.to_string(),
        });
    }
    if let Some(value) = flag {
        return humantime::parse_duration(value.trim()).map_err(|source| ConfigError::Duration {
            name,
            value,
            source,
        });
    }
    Ok(env
        .and_then(|value| humantime::parse_duration(value.trim()).ok())
        .unwrap_or(default))
}

fn ensure_directory(path: &Path) -> Result<(), ConfigError> {
    let meta = std::fs::metadata(path).map_err(|source| ConfigError::Workspace {
        path: path.to_path_buf(),
        source,
    })?;
    if !meta.is_dir() {
        return Err(ConfigError::NotADirectory(path.to_path_buf()));
    }
    Ok(())
}

/// Resolve `program` the way a shell would: names containing a path separator are
/// used as given, bare names are searched for in `search_path`.
fn resolve_executable(program: &str, search_path: Option<String>) -> Result<PathBuf, ConfigError> {
    let candidate = Path::new(program);
    let resolved = if candidate.is_absolute() || candidate.components().count() > 1 {
        candidate.to_path_buf()
    } else {
        search_path
            .as_deref()
            .map(|paths| std::env::split_paths(paths).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
            .map(|dir| dir.join(program))
            .find(|path| {
                std::fs::metadata(path).is_ok_and(|meta| meta.is_file() && is_executable(&meta))
            })
            .ok_or_else(|| ConfigError::ExecutableNotFound(program.to_string()))?
    };

    let meta = std::fs::metadata(&resolved).map_err(|source| ConfigError::ExecutableStat {
        path: resolved.clone(),
        source,
    })?;
    if meta.is_dir() {
        return Err(ConfigError::ExecutableIsDirectory(resolved));
    }
    if !is_executable(&meta) {
        return Err(ConfigError::NotExecutable(resolved));
    }
    Ok(resolved)
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    meta.is_file()
}
