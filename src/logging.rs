//! Structured logging setup using tracing.

use crate::config::{FileLoggingConfig, LogFormat, LogRotation, LoggingConfig};
use std::fs;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Keep alive for the life of the program; dropping it flushes the log file.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber: stdout in the configured format, plus
/// JSON lines to a rolling file when `file` is set. `RUST_LOG` overrides
/// the default `info` filter. A second call is a no-op.
pub fn init_logging(config: &LoggingConfig) -> LogGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_text = (config.format == LogFormat::Text).then(|| fmt::layer());
    let stdout_json = (config.format == LogFormat::Json).then(|| fmt::layer().json());

    let (file_layer, file_guard) = match &config.file {
        Some(file_config) => {
            let (writer, guard) = create_file_writer(file_config);
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_text)
        .with(stdout_json)
        .with(file_layer)
        .try_init();

    LogGuard {
        _file_guard: file_guard,
    }
}

fn rotation_for(rotation: &LogRotation) -> Rotation {
    match rotation {
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Never => Rotation::NEVER,
    }
}

fn create_file_writer(config: &FileLoggingConfig) -> (NonBlocking, WorkerGuard) {
    // Ensure log directory exists
    fs::create_dir_all(&config.log_dir).ok();

    let appender = RollingFileAppender::new(
        rotation_for(&config.rotation),
        &config.log_dir,
        &config.file_prefix,
    );
    tracing_appender::non_blocking(appender)
}
