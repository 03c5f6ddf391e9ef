//! # Logging Setup
//!
//! Installs the global `tracing` subscriber for binaries built on this crate:
//! a human readable console layer plus a JSON layer written to a daily rotating
//! file. The library itself only emits events and never installs a subscriber.

use std::path::PathBuf;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{GaugeFeedError, Result};

/// Where and how verbosely to log.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Directory for the rotating JSON files. Created if missing.
    pub log_dir: PathBuf,
    /// File name prefix, usually the binary name.
    pub file_prefix: String,
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
    /// Colored console output.
    pub ansi: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            file_prefix: "gaugefeed".to_string(),
            level: "info".to_string(),
            ansi: true,
        }
    }
}

/// # Setup Logging
///
/// Builds the subscriber and installs it globally. `RUST_LOG` takes precedence
/// over [`LogOptions::level`].
///
/// # Returns
/// The appender's [`WorkerGuard`]. Keep it alive until the program exits or
/// buffered file output is lost.
///
/// # Errors
/// Fails when the log directory cannot be created, the level is not a valid
/// filter directive, or a global subscriber is already installed.
pub fn setup_logging(options: &LogOptions) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&options.log_dir)?;

    let file_appender = rolling::daily(&options.log_dir, &options.file_prefix);
    let (file_writer, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(options.ansi);

    let file_layer = fmt::layer().with_ansi(false).with_writer(file_writer).json();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.level))
        .map_err(|e| GaugeFeedError::Config(format!("invalid log level '{}': {}", options.level, e)))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| GaugeFeedError::Config(format!("logging already initialized: {}", e)))?;

    info!(dir = %options.log_dir.display(), level = %options.level, "Logging initialized");
    Ok(guard)
}
