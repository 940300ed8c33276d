//! Logging setup
//!
//! Console output plus an optional rotated JSON log file.

use crate::config::{LogRotation, LoggingConfig};
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_NAME: &str = "timebox.log";

/// Initialize the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    // RUST_LOG wins over the configured level
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let console_layer = if config.json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(io::stdout)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .with_writer(io::stdout)
            .boxed()
    };

    if config.file_logging_enabled {
        std::fs::create_dir_all(&config.log_dir)?;

        let file_appender = match config.rotation {
            LogRotation::Hourly => rolling::hourly(&config.log_dir, LOG_FILE_NAME),
            LogRotation::Daily => rolling::daily(&config.log_dir, LOG_FILE_NAME),
            LogRotation::Never => rolling::never(&config.log_dir, LOG_FILE_NAME),
        };
        let (writer, guard) = non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .json()
            .with_writer(writer);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        tracing::info!(level = %config.level, dir = ?config.log_dir, "Logging initialized");
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()?;

        tracing::info!(level = %config.level, "Logging initialized (console only)");
        Ok(None)
    }
}

/// Log a lifecycle transition with the resource as structured context
#[macro_export]
macro_rules! log_lifecycle {
    ($transition:expr, $resource_id:expr) => {
        tracing::info!(
            transition = $transition,
            resource_id = %$resource_id,
            "Lifecycle transition"
        )
    };
    ($transition:expr, $resource_id:expr, $($key:ident = $value:expr),+) => {
        tracing::info!(
            transition = $transition,
            resource_id = %$resource_id,
            $($key = $value),+,
            "Lifecycle transition"
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_logging_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.file_logging_enabled);
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_rotation_from_toml() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            logging: LoggingConfig,
        }

        let w: Wrapper = toml::from_str("[logging]\nrotation = \"hourly\"\njson_format = true").unwrap();
        assert_eq!(w.logging.rotation, LogRotation::Hourly);
        assert!(w.logging.json_format);
        assert_eq!(w.logging.level, "info");
    }
}
