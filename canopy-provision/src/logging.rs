//! Logging configuration module
//! Console output always, plus an optional rolling file

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,             // log level (trace, debug, info, warn, error)
    pub file_dir: Option<PathBuf>, // directory for canopy.log
    pub rotation: LogRotation,     // log rotation policy
    pub json_format: bool,         // JSON on the console as well
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{0}': {1}")]
    Filter(String, String),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
            rotation: LogRotation::Daily,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| LoggingError::Filter(self.level.clone(), e.to_string())),
        }
    }

    /// Initialize logging based on configuration
    ///
    /// The returned guard must be held for the life of the process when a
    /// file layer is configured, or buffered lines are lost on exit.
    pub fn init(&self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = self.filter()?;

        let console_layer = if self.json_format {
            fmt::layer()
                .json()
                .with_target(true)
                .with_writer(io::stderr)
                .boxed()
        } else {
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_ansi(true)
                .with_writer(io::stderr)
                .boxed()
        };

        let (file_layer, guard) = match self.file_dir {
            Some(ref dir) => {
                let appender = match self.rotation {
                    LogRotation::Hourly => rolling::hourly(dir, "canopy.log"),
                    LogRotation::Daily => rolling::daily(dir, "canopy.log"),
                    LogRotation::Never => rolling::never(dir, "canopy.log"),
                };
                let (writer, guard) = non_blocking(appender);

                let layer = fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .json()
                    .with_writer(writer)
                    .boxed();
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))?;

        tracing::debug!(level = %self.level, file = ?self.file_dir, "Logging initialized");

        Ok(guard)
    }
}
