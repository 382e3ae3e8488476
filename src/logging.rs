//! # Structured Logging Module
//!
//! Environment-aware structured logging for debugging the async
//! orchestration loops. Console output always; JSON file output when a
//! log directory is configured.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs the
/// subscriber. Honors `RUST_LOG` when set, otherwise derives the level
/// from `WARDFLOW_ENV`.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level.clone()));

        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(filter);

        let registry = tracing_subscriber::registry().with(console_layer);

        // Optional JSON file layer, enabled by WARDFLOW_LOG_DIR
        if let Ok(dir) = std::env::var("WARDFLOW_LOG_DIR") {
            let log_dir = PathBuf::from(dir);
            if !log_dir.exists() {
                let _ = fs::create_dir_all(&log_dir);
            }
            let pid = process::id();
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            let filename = format!("{environment}.{pid}.{timestamp}.log");
            if let Ok(file) = fs::File::create(log_dir.join(&filename)) {
                let file_layer = fmt::layer()
                    .with_writer(file)
                    .with_target(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(log_level));
                if registry.with(file_layer).try_init().is_ok() {
                    tracing::info!(
                        pid = pid,
                        environment = %environment,
                        log_file = %filename,
                        "🔧 Structured logging initialized with file output"
                    );
                }
                return;
            }
        }

        if registry.try_init().is_ok() {
            tracing::debug!(environment = %environment, "Structured logging initialized");
        }
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("WARDFLOW_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("test"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_logging();
        init_logging();
    }
}
