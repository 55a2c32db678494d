//! Multiplexed analog acquisition for the kiuas controller.
//!
//! Up to sixteen analog channels sit behind two cascaded 8:1 multiplexers
//! feeding one ADC pin. A timer interrupt samples one channel per tick into
//! a fixed arena of ring buffers; the main loop snapshots a buffer and
//! extracts its AC RMS voltage.
//!
//! # Contexts
//!
//! - [`MultiplexedSampler::tick`] runs in interrupt context: no allocation,
//!   no blocking, one short critical section for the append.
//! - [`RmsExtractor`] runs in the main loop: it holds the critical section
//!   only for the buffer copy, never for the arithmetic.
//!
//! Host builds get a `critical-section` implementation from the `std`
//! feature; firmware links its target's interrupt-disable implementation.

pub mod buffer;
pub mod error;
pub mod mux;
pub mod rms;
pub mod sampler;

pub use buffer::{ChannelBuffer, SampleArena, Snapshot, DEFAULT_BUFFER_CAPACITY};
pub use error::{AcquireError, AcquireResult};
pub use mux::{AnalogRead, CascadeLayout, MuxAddress, MuxDriver, ShiftMuxError, ShiftRegisterMux};
pub use rms::{AdcScale, RmsExtractor, RmsStats};
pub use sampler::{
    MultiplexedSampler, SampleOutcome, SamplerConfig, SamplerStats, SAFE_SAMPLE_RATE_CEILING_HZ,
};
