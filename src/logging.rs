//! Tracing configuration and log routing.
//!
//! Command output owns stdout, so human-readable logs go to stderr. A second, non-blocking
//! layer appends plain-text logs to a file chosen by [`log_file_from_env`].
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Log file used when `DOCVAULT_LOG_FILE` is unset.
pub const DEFAULT_LOG_FILE: &str = "logs/docvault.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// How the process should log.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter applied when `RUST_LOG` is unset.
    pub default_filter: &'static str,
    /// File receiving a copy of every event, if any.
    pub file: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            default_filter: "info",
            file: log_file_from_env(),
        }
    }
}

/// Resolve the log file from `DOCVAULT_LOG_FILE`.
///
/// Unset falls back to [`DEFAULT_LOG_FILE`]; `off` or an empty value disables file logging.
pub fn log_file_from_env() -> Option<PathBuf> {
    match std::env::var("DOCVAULT_LOG_FILE") {
        Ok(value) if value.trim().is_empty() || value.trim().eq_ignore_ascii_case("off") => None,
        Ok(value) => Some(PathBuf::from(value.trim())),
        Err(_) => Some(PathBuf::from(DEFAULT_LOG_FILE)),
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `options.default_filter`.
///
/// The file writer's guard is parked in a global so buffered lines are flushed at exit.
pub fn init_tracing(options: LogOptions) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_filter));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    let file_layer = options.file.as_deref().and_then(file_writer).map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

fn file_writer(path: &Path) -> Option<NonBlocking> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        if let Err(err) = std::fs::create_dir_all(parent) {
            eprintln!("Failed to create log directory {}: {err}", parent.display());
            return None;
        }
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path);
    match file {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            None
        }
    }
}
