//! Logging initialization and configuration.
//!
//! This module provides environment-aware logging setup:
//! - **Production**: JSON logs to rolling files + compact logs to stdout
//! - **Development**: Pretty logs to stdout with span events
//!
//! Environment variables:
//! - `GUARDIAN_ENV=production` selects the production layout
//! - `RUST_LOG` or `GUARDIAN_LOG_LEVEL` set the filter (default `info`)
//! - `GUARDIAN_LOG_DIR` overrides the log file directory

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when neither `RUST_LOG` nor `GUARDIAN_LOG_LEVEL` is set.
const DEFAULT_LEVEL: &str = "info";

/// Log file name prefix; the appender adds the date.
const LOG_FILE_PREFIX: &str = "guardian";

/// Static guards to keep non-blocking writers alive for the lifetime of the program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Whether `GUARDIAN_ENV` selects production logging.
#[must_use]
pub fn is_production() -> bool {
    std::env::var("GUARDIAN_ENV").is_ok_and(|env| env.eq_ignore_ascii_case("production"))
}

/// Initialize the logging system with environment-appropriate configuration.
///
/// # Production Mode
///
/// - Logs to rolling daily files in [`log_directory`]
/// - Also logs to stdout for systemd journal capture
/// - JSON format in files, compact without ANSI colors on stdout
/// - Falls back to stdout only when the log directory cannot be created
///
/// # Development Mode
///
/// - Logs to stdout only with pretty formatting and span events
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let filter = env_filter(
        std::env::var("GUARDIAN_LOG_LEVEL")
            .ok()
            .as_deref()
            .unwrap_or(DEFAULT_LEVEL),
    )?;

    if is_production {
        init_production(filter);
    } else {
        init_development(filter);
    }

    Ok(())
}

/// `RUST_LOG` wins over the guardian-specific level.
fn env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?)
}

fn init_production(filter: EnvFilter) {
    let log_dir = log_directory();
    let dir_error = std::fs::create_dir_all(&log_dir).err();

    let (stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout)
        .with_target(true)
        .with_ansi(false);

    let file_layer = if dir_error.is_none() {
        let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
        let (file, file_guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(file_guard);
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
    let _ = STDOUT_GUARD.set(stdout_guard);

    if let Some(e) = dir_error {
        warn!(dir = %log_dir.display(), error = %e, "Cannot create log directory; logging to stdout only");
    }
}

fn init_development(filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .init();
}

/// Directory for rolling log files.
///
/// `GUARDIAN_LOG_DIR` takes precedence over the platform default.
#[must_use]
pub fn log_directory() -> PathBuf {
    if let Some(dir) = std::env::var_os("GUARDIAN_LOG_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    default_log_directory()
}

fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/guardian")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "guardian")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_directory_is_valid_path() {
        let dir = default_log_directory();
        assert!(!dir.as_os_str().is_empty());
        assert!(dir.to_string_lossy().contains("guardian") || dir.ends_with("logs"));
    }

    #[test]
    fn test_env_filter_accepts_directives() {
        assert!(env_filter("debug,hyper=warn").is_ok());
    }
}
