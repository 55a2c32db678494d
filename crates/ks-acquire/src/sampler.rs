//! Round-robin sampler driven by a periodic timer interrupt.
//!
//! Each tick samples exactly one channel from the configured list and moves
//! the cursor on. The per-channel rate is therefore `rate_hz / channels`.

use ks_core::{ChannelId, MAX_CHANNELS};
use tracing::{info, warn};

use crate::buffer::SampleArena;
use crate::error::{AcquireError, AcquireResult};
use crate::mux::{CascadeLayout, MuxDriver};

/// Highest aggregate sample rate validated on the reference board.
///
/// Bench results with seven channels behind the cascade: 250 Hz stable,
/// 330 Hz usable with irregular ping times, 350 Hz and up starves the
/// network stack until the watchdog resets the device. The sampler ISR and
/// the network stack share one core, so there is no headroom above this.
pub const SAFE_SAMPLE_RATE_CEILING_HZ: u32 = 250;

/// Sampler tuning and channel list.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Aggregate timer rate across all channels.
    pub rate_hz: u32,
    /// Permit rates above [`SAFE_SAMPLE_RATE_CEILING_HZ`] (bench tuning only).
    pub allow_above_ceiling: bool,
    /// Worst-case snapshot copy time; must stay below one sample period.
    pub snapshot_budget_us: u32,
    /// Channels visited in order, wrapping around.
    pub channels: Vec<ChannelId>,
    pub layout: CascadeLayout,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        let channels = [0, 1, 2, 3, 8, 9, 10]
            .into_iter()
            .filter_map(|raw| ChannelId::new(raw).ok())
            .collect();
        Self {
            rate_hz: SAFE_SAMPLE_RATE_CEILING_HZ,
            allow_above_ceiling: false,
            snapshot_budget_us: 50,
            channels,
            layout: CascadeLayout::default(),
        }
    }
}

impl SamplerConfig {
    /// Timer period in microseconds.
    pub fn period_us(&self) -> u32 {
        if self.rate_hz == 0 {
            return u32::MAX;
        }
        1_000_000 / self.rate_hz
    }

    /// Effective rate for each channel.
    pub fn per_channel_rate_hz(&self) -> f64 {
        if self.channels.is_empty() {
            return 0.0;
        }
        f64::from(self.rate_hz) / self.channels.len() as f64
    }

    /// Reject settings that would drop samples, starve I/O or let a
    /// snapshot copy overlap the next sampler tick.
    pub fn validate(&self) -> AcquireResult<()> {
        if self.rate_hz == 0 {
            return Err(AcquireError::InvalidConfig {
                what: "sample rate must be positive".to_string(),
            });
        }
        if self.rate_hz > SAFE_SAMPLE_RATE_CEILING_HZ && !self.allow_above_ceiling {
            return Err(AcquireError::RateAboveCeiling {
                rate_hz: self.rate_hz,
                ceiling_hz: SAFE_SAMPLE_RATE_CEILING_HZ,
            });
        }
        let period_us = self.period_us();
        if period_us <= self.snapshot_budget_us {
            return Err(AcquireError::SnapshotOverrun {
                period_us,
                budget_us: self.snapshot_budget_us,
            });
        }
        if self.channels.is_empty() {
            return Err(AcquireError::InvalidConfig {
                what: "channel list is empty".to_string(),
            });
        }
        if self.channels.len() > MAX_CHANNELS {
            return Err(AcquireError::InvalidConfig {
                what: format!("{} channels exceed the {MAX_CHANNELS}-channel cascade", self.channels.len()),
            });
        }
        for (i, ch) in self.channels.iter().enumerate() {
            if self.layout.is_occupied(*ch) {
                return Err(AcquireError::InvalidConfig {
                    what: format!(
                        "{ch} is the cascade input of the secondary mux and cannot be sampled directly"
                    ),
                });
            }
            if self.channels[..i].contains(ch) {
                return Err(AcquireError::InvalidConfig {
                    what: format!("{ch} listed twice"),
                });
            }
        }
        Ok(())
    }
}

/// Result of one sampler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Stored { channel: ChannelId, raw: u16 },
    /// The driver failed; nothing was stored and the cursor moved on anyway.
    Dropped { channel: ChannelId },
}

/// Counters kept by the sampler; plain integers, owned by the ISR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub stored: u64,
    pub dropped: u64,
}

/// Interrupt-context sampler over a fixed channel list.
///
/// The channel list is copied into a fixed array at construction so the
/// tick path never touches the heap.
pub struct MultiplexedSampler<'a, D, const N: usize> {
    arena: &'a SampleArena<N>,
    driver: D,
    layout: CascadeLayout,
    channels: [ChannelId; MAX_CHANNELS],
    count: usize,
    cursor: usize,
    stats: SamplerStats,
}

impl<'a, D: MuxDriver, const N: usize> MultiplexedSampler<'a, D, N> {
    /// Validate `config` and build a sampler writing into `arena`.
    pub fn new(config: &SamplerConfig, arena: &'a SampleArena<N>, driver: D) -> AcquireResult<Self> {
        config.validate()?;
        let first = config.channels[0];
        let mut channels = [first; MAX_CHANNELS];
        channels[..config.channels.len()].copy_from_slice(&config.channels);
        info!(
            rate_hz = config.rate_hz,
            channels = config.channels.len(),
            per_channel_hz = config.per_channel_rate_hz(),
            "sampler configured"
        );
        Ok(Self {
            arena,
            driver,
            layout: config.layout,
            channels,
            count: config.channels.len(),
            cursor: 0,
            stats: SamplerStats::default(),
        })
    }

    /// Sample the current channel and advance the cursor. Timer ISR body.
    pub fn tick(&mut self) -> SampleOutcome {
        let channel = self.channels[self.cursor];
        self.cursor = if self.cursor + 1 == self.count {
            0
        } else {
            self.cursor + 1
        };

        let address = self.layout.address(channel);
        let read = self
            .driver
            .select(address)
            .and_then(|()| self.driver.read_raw());
        match read {
            Ok(raw) => {
                self.arena.append(channel, raw);
                self.stats.stored += 1;
                SampleOutcome::Stored { channel, raw }
            }
            Err(_) => {
                self.stats.dropped += 1;
                SampleOutcome::Dropped { channel }
            }
        }
    }

    /// Channel the next tick will sample.
    pub fn next_channel(&self) -> ChannelId {
        self.channels[self.cursor]
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels[..self.count]
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// Log and reset the counters. Main-context housekeeping only.
    pub fn take_stats(&mut self) -> SamplerStats {
        let stats = core::mem::take(&mut self.stats);
        if stats.dropped > 0 {
            warn!(dropped = stats.dropped, stored = stats.stored, "sampler dropped reads");
        }
        stats
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}
