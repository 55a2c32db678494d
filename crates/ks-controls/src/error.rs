//! Error types for control operations.

use ks_core::KsError;
use thiserror::Error;

/// Result type for control operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur configuring or commanding the control loop.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    /// Invalid argument provided to a control function.
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    /// Command addressed an output that does not exist.
    #[error("Unknown output {number} (have {count})")]
    UnknownOutput { number: u8, count: usize },

    /// Setpoint outside the accepted band.
    #[error("Setpoint {value} outside (0, {max})")]
    SetpointOutOfRange { value: f64, max: f64 },

    #[error(transparent)]
    Core(#[from] KsError),
}
