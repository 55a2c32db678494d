//! Error types for acquisition setup and readout.

use ks_core::{ChannelId, KsError};
use thiserror::Error;

pub type AcquireResult<T> = Result<T, AcquireError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AcquireError {
    #[error("Invalid sampler configuration: {what}")]
    InvalidConfig { what: String },

    /// Rates above the ceiling starve the network stack and trip the watchdog.
    #[error("Sample rate {rate_hz} Hz exceeds validated ceiling of {ceiling_hz} Hz")]
    RateAboveCeiling { rate_hz: u32, ceiling_hz: u32 },

    /// The snapshot copy must finish inside one sample period.
    #[error("Sample period {period_us} us does not exceed snapshot budget {budget_us} us")]
    SnapshotOverrun { period_us: u32, budget_us: u32 },

    #[error("No samples recorded yet on {channel}")]
    NoSamples { channel: ChannelId },

    #[error(transparent)]
    Core(#[from] KsError),
}
