//! Logging setup for the daemon and its one-shot subcommands.
//!
//! The daemon writes JSON lines to a daily-rotated file (so authorization
//! verdicts survive restarts and are grep-able per day) and mirrors
//! human-readable output to stderr. One-shot subcommands skip the file
//! layer entirely.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the non-blocking file writer alive.
///
/// Dropping the guard flushes pending entries and closes the log file, so
/// the daemon holds it until shutdown.
pub struct LoggingGuard {
    _file_writer: WorkerGuard,
}

/// Filter from `RUST_LOG`, falling back to `default_level` when unset.
fn filter_or(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialise logging for the `start` subcommand.
///
/// JSON file layer at `{logs_dir}/sensord.log.YYYY-MM-DD` plus a
/// human-readable stderr layer, both behind the same filter. The returned
/// [`LoggingGuard`] must live as long as the daemon.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_daemon(logs_dir: &Path, default_level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "sensord.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter_or(default_level))
        .with(tracing_subscriber::fmt::layer().json().with_writer(file_writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard { _file_writer: guard })
}

/// Initialise stderr-only logging for one-shot subcommands.
///
/// Controlled by `RUST_LOG` (default: `info`); no file layer.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(filter_or("info"))
        .with_writer(std::io::stderr)
        .init();
}
