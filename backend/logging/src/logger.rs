//! Structured Logger
//!
//! Wraps `tracing` with a human-readable console layer and, when a log
//! directory is configured, a non-blocking JSON file layer rotated daily.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "parley.log";

/// Keeps the file writer flushing. Hold it until the process exits.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Console output goes to stderr so
/// command output on stdout stays machine-readable. Calling this twice is
/// harmless; the second subscriber is simply not installed.
pub fn init_logger(log_dir: Option<&Path>, level: &str) -> Result<LogGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level '{level}'"))?;

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(true);

    let (file_layer, file_guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            // Writes NDJSON to `<dir>/parley.log.YYYY-MM-DD`
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok(LogGuard { _file: file_guard })
}
