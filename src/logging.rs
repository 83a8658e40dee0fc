//! Structured logging configuration
//!
//! Provides logging with:
//! - JSON output for machine consumption
//! - Pretty formatting for development
//! - Console (stderr), daily-rolling file, or both
//! - `RUST_LOG` taking precedence over the configured level
//!
//! Reports go to stdout, so console logging always writes to stderr.

use crate::config::Config;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_FILE_NAME: &str = "s3du.log";

/// Initialize the logging system based on configuration.
///
/// Returns the file writer guard when logging to a file; keep it alive until exit or
/// buffered lines are lost. Does nothing if a subscriber is already installed.
pub fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));
    let format = config.logging.format.as_str();

    match config.logging.output.as_str() {
        "file" => init_file_logging(env_filter, format, &config.paths.log_directory, false),
        "both" => init_file_logging(env_filter, format, &config.paths.log_directory, true),
        _ => {
            init_console_logging(env_filter, format);
            None
        }
    }
}

fn init_console_logging(filter: EnvFilter, format: &str) {
    let subscriber = tracing_subscriber::registry().with(filter);

    let _ = match format {
        "json" => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .try_init(),
        _ => subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .pretty(),
            )
            .try_init(),
    };
}

fn init_file_logging(
    filter: EnvFilter,
    format: &str,
    log_dir: &Path,
    also_console: bool,
) -> Option<WorkerGuard> {
    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!(
            "Failed to create log directory {}: {e}; logging to stderr",
            log_dir.display()
        );
        init_console_logging(filter, format);
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let subscriber = tracing_subscriber::registry().with(filter);

    let console = also_console.then(|| fmt::layer().with_writer(std::io::stderr));

    let _ = match format {
        "json" => subscriber
            .with(console.map(|layer| layer.json()))
            .with(
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
        _ => subscriber
            .with(console.map(|layer| layer.pretty()))
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .try_init(),
    };

    Some(guard)
}
