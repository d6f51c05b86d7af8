//! Tracing setup shared by the gateway and simulator binaries

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{time::ChronoLocal, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const TIMESTAMP_FORMAT: &str = "[%Y-%m-%d %H:%M:%S]";

/// Install the global subscriber
///
/// `RUST_LOG` wins over `directive`. With `log_file` set, output is appended
/// to that file through a background writer; the returned guard must live
/// until shutdown or buffered lines are lost.
pub fn init_logging(directive: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .with_context(|| format!("Invalid log level: {}", directive))?;

    let (writer, guard, ansi) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            let dir = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), None, true),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_target(false)
                .with_ansi(ansi)
                .with_writer(writer),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
