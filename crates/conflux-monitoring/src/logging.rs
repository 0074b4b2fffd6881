//! Structured logging bootstrap using tracing.
//!
//! Pretty output for development, JSON lines for log aggregation, and an
//! optional daily-rotated JSON file.

use anyhow::Context;
use std::path::Path;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::MonitoringConfig;

/// Filter from `RUST_LOG`, falling back to the configured filter
pub fn build_filter(config: &MonitoringConfig) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_filter)
            .with_context(|| format!("Invalid log filter '{}'", config.log_filter)),
    }
}

/// Directory and file name prefix of a rolling log file
fn split_log_path(log_file: &str) -> (&Path, String) {
    let path = Path::new(log_file);
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "conflux.log".to_string());
    (directory, prefix)
}

/// Initialize structured logging as the global subscriber
pub fn init_logging(config: &MonitoringConfig) -> anyhow::Result<()> {
    let env_filter = build_filter(config)?;

    let stdout_layer = if config.enable_json_logging {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    };

    let file_layer = config.log_file.as_deref().map(|log_file| {
        let (directory, prefix) = split_log_path(log_file);
        let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, prefix);
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_writer(file_appender)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to set global default subscriber")?;

    info!(
        service_name = %config.service_name,
        log_format = if config.enable_json_logging { "json" } else { "pretty" },
        log_file = ?config.log_file,
        "Logging initialized"
    );

    Ok(())
}

/// Test subscriber writing through the test harness; safe to call repeatedly
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Trait to add log context to results
pub trait LogExt<T, E> {
    /// Log error with additional context before returning
    fn log_err(self, message: &str) -> Result<T, E>;

    /// Log success with additional context before returning
    fn log_ok(self, message: &str) -> Result<T, E>;
}

impl<T, E: std::fmt::Display> LogExt<T, E> for Result<T, E> {
    fn log_err(self, message: &str) -> Result<T, E> {
        if let Err(ref e) = self {
            tracing::error!("{}: {}", message, e);
        }
        self
    }

    fn log_ok(self, message: &str) -> Result<T, E> {
        if self.is_ok() {
            tracing::info!("{}", message);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path_split() {
        let (directory, prefix) = split_log_path("logs/engine.log");
        assert_eq!(directory, Path::new("logs"));
        assert_eq!(prefix, "engine.log");

        let (directory, prefix) = split_log_path("engine.log");
        assert_eq!(directory, Path::new("."));
        assert_eq!(prefix, "engine.log");
    }

    #[test]
    fn test_invalid_filter_is_reported() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = MonitoringConfig {
            log_filter: "conflux_core=loudest".to_string(),
            ..MonitoringConfig::default()
        };
        let err = build_filter(&config).unwrap_err();
        assert!(err.to_string().contains("Invalid log filter"));

        assert!(build_filter(&MonitoringConfig::default()).is_ok());
    }

    #[test]
    fn test_log_ext_passes_results_through() {
        init_test_logging();
        let ok: Result<u8, String> = Ok(1);
        assert_eq!(ok.log_ok("fine").log_err("unused"), Ok(1));
        let err: Result<u8, String> = Err("broken".into());
        assert_eq!(err.log_err("failed"), Err("broken".to_string()));
    }
}
