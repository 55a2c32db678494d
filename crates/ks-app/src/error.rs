//! Error types for the firmware application layer.

use std::path::PathBuf;

use ks_acquire::AcquireError;
use ks_auth::AuthError;
use ks_controls::ControlError;

/// Wraps the errors of the library crates plus file and command failures.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration invalid: {0}")]
    Config(String),

    #[error("Failed to read {path}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Process temperature probe not detected")]
    ProbeNotDetected,

    #[error("Invalid command `{key}={value}`: {reason}")]
    InvalidCommand {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Command queue full ({capacity} batches pending)")]
    QueueFull { capacity: usize },

    #[error("Command queue closed")]
    QueueClosed,

    #[error("Acquisition error: {0}")]
    Acquire(#[from] AcquireError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

pub type AppResult<T> = Result<T, AppError>;
