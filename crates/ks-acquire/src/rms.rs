//! AC RMS voltage extraction from channel buffers.
//!
//! The DC offset of the conditioning circuit is removed by using the
//! variance rather than the raw mean square, so the result is the RMS of
//! the AC component only.

use ks_core::{ChannelId, Voltage, volts};

use crate::buffer::SampleArena;
use crate::error::{AcquireError, AcquireResult};

/// Conversion from raw ADC counts to volts at the measured mains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdcScale {
    /// Full-scale ADC input voltage.
    pub reference_volts: f64,
    /// Count returned at full scale.
    pub max_count: u16,
    /// Divider/transformer ratio back to the measured voltage.
    pub calibration: f64,
}

impl Default for AdcScale {
    fn default() -> Self {
        Self {
            reference_volts: 1.0,
            max_count: 1023,
            calibration: 875.0,
        }
    }
}

impl AdcScale {
    /// Volts per ADC count, calibration included.
    pub fn volts_per_count(&self) -> f64 {
        self.reference_volts / f64::from(self.max_count) * self.calibration
    }
}

/// Moments of one buffer snapshot, in raw counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmsStats {
    pub count: usize,
    pub mean: f64,
    pub mean_square: f64,
    /// Clamped to zero; rounding can push it slightly negative.
    pub variance: f64,
    pub rms_counts: f64,
}

impl RmsStats {
    /// Single pass over `samples`. Returns `None` for an empty slice.
    pub fn from_samples(samples: &[u16]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let (sum, sum_sq) = samples.iter().fold((0.0_f64, 0.0_f64), |(s, sq), &v| {
            let v = f64::from(v);
            (s + v, sq + v * v)
        });
        let n = samples.len() as f64;
        let mean = sum / n;
        let mean_square = sum_sq / n;
        let variance = (mean_square - mean * mean).max(0.0);
        Some(Self {
            count: samples.len(),
            mean,
            mean_square,
            variance,
            rms_counts: variance.sqrt(),
        })
    }
}

/// On-demand RMS readout over a shared [`SampleArena`].
pub struct RmsExtractor<'a, const N: usize> {
    arena: &'a SampleArena<N>,
    scale: AdcScale,
}

impl<'a, const N: usize> RmsExtractor<'a, N> {
    pub fn new(arena: &'a SampleArena<N>, scale: AdcScale) -> Self {
        Self { arena, scale }
    }

    pub fn scale(&self) -> AdcScale {
        self.scale
    }

    /// Snapshot `channel` and compute its statistics in raw counts.
    ///
    /// Only the copy runs with the sampler excluded.
    pub fn stats(&self, channel: ChannelId) -> AcquireResult<RmsStats> {
        let snapshot = self.arena.snapshot(channel);
        RmsStats::from_samples(snapshot.valid()).ok_or(AcquireError::NoSamples { channel })
    }

    pub fn rms_volts(&self, channel: ChannelId) -> AcquireResult<f64> {
        Ok(self.stats(channel)?.rms_counts * self.scale.volts_per_count())
    }

    pub fn rms(&self, channel: ChannelId) -> AcquireResult<Voltage> {
        self.rms_volts(channel).map(volts)
    }

    /// RMS of every listed channel, one short critical section per channel.
    pub fn rms_all(&self, channels: &[ChannelId]) -> Vec<(ChannelId, AcquireResult<f64>)> {
        channels
            .iter()
            .map(|&ch| (ch, self.rms_volts(ch)))
            .collect()
    }
}
