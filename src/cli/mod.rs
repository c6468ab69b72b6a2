//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - The interactive operator console
//! - Tracing setup shared by both binaries

pub mod console;
pub mod exit_codes;

pub use console::{parse_command, Command, Console, KeystrokePrompt, LinePrompt};
pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file prefix for the daily rolling log
pub const LOG_FILE_PREFIX: &str = "vswr-console.log";

/// Install the global subscriber
///
/// Logs go to stderr, filtered by `RUST_LOG` or `default_level`. With a
/// directory, a daily rolling file is written as well; keep the returned guard
/// alive until exit so buffered lines are flushed. `json_file` switches the
/// file to one JSON object per line.
pub fn init_tracing(default_level: &str, log_dir: Option<&Path>, json_file: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let file = log_dir.and_then(|dir| match std::fs::create_dir_all(dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            Some(tracing_appender::non_blocking(appender))
        }
        Err(e) => {
            eprintln!("Log directory {} unavailable: {}", dir.display(), e);
            None
        }
    });

    match file {
        Some((writer, guard)) => {
            let base = tracing_subscriber::registry().with(filter).with(stderr);
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
            if json_file {
                base.with(file_layer.json()).init();
            } else {
                base.with(file_layer).init();
            }
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}
