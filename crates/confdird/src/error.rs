//! Error types for the configuration daemon.

use confdir::ConfigError;
use confdir_telemetry::TelemetryError;
use thiserror::Error;

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Daemon errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Settings or configuration tree could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logging or metrics could not be initialized.
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// Signal handler installation or other I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task ended abnormally.
    #[error("Task error: {message}")]
    Task {
        /// Error message.
        message: String,
    },
}

impl DaemonError {
    /// Create a task error.
    pub fn task(message: impl Into<String>) -> Self {
        Self::Task {
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Telemetry(_) => 3,
            Self::Io(_) | Self::Task { .. } => 1,
        }
    }
}
