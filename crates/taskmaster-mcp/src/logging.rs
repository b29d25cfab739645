//! Tracing setup.
//!
//! Stdout carries the JSON-RPC stream in stdio mode, so logs never go there.
//! They are written to `<directory>/<file_name>` through a non-blocking
//! appender, or to stderr when no log directory can be created.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingSection;

/// Where log output ended up.
#[derive(Debug)]
pub enum LogSink {
    /// Logging to a file. The guard flushes buffered lines on drop and must
    /// be held for the life of the process.
    File(WorkerGuard),
    Stderr,
}

/// `RUST_LOG` wins over the configured level.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global subscriber.
pub fn init(config: &LoggingSection) -> anyhow::Result<LogSink> {
    let filter = env_filter(&config.level);

    if let Some(appender) = file_appender(config) {
        let (writer, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(writer).with_ansi(false))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
        return Ok(LogSink::File(guard));
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    Ok(LogSink::Stderr)
}

fn ensure_dir(directory: &Path) -> bool {
    std::fs::create_dir_all(directory).is_ok()
}

fn file_appender(config: &LoggingSection) -> Option<RollingFileAppender> {
    let directory = config.resolved_directory()?;
    if !ensure_dir(&directory) {
        return None;
    }

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(&config.file_name)
        .build(&directory)
        .ok()
}
