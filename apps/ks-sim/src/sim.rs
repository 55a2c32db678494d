//! Simulated board: probes, door, relays, mains channels and a scripted
//! scenario of door openings and probe dropouts.

use std::f64::consts::{PI, SQRT_2};

use ks_acquire::{AdcScale, MuxAddress, MuxDriver};
use ks_app::{DoorSwitch, OutputDriver, TemperatureProbe};
use ks_controls::SENSOR_DISCONNECTED_C;
use ks_core::MUX_WIDTH;

const MAINS_HZ: f64 = 50.0;

/// `[start, end)` in simulated seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub start_s: f64,
    pub end_s: f64,
}

impl Span {
    pub fn contains(&self, t_s: f64) -> bool {
        t_s >= self.start_s && t_s < self.end_s
    }
}

impl std::str::FromStr for Span {
    type Err = String;

    /// `START+DURATION` in seconds, e.g. `600+45`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, duration) = s
            .split_once('+')
            .ok_or_else(|| format!("expected START+DURATION, got `{s}`"))?;
        let start_s: f64 = start.trim().parse().map_err(|_| format!("bad start in `{s}`"))?;
        let duration_s: f64 = duration
            .trim()
            .parse()
            .map_err(|_| format!("bad duration in `{s}`"))?;
        if !(start_s >= 0.0 && duration_s > 0.0) {
            return Err(format!("`{s}` must start at or after 0 and last a positive time"));
        }
        Ok(Self {
            start_s,
            end_s: start_s + duration_s,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scenario {
    pub door_open: Vec<Span>,
    pub probe_dropout: Vec<Span>,
}

impl Scenario {
    pub fn door_open_at(&self, t_s: f64) -> bool {
        self.door_open.iter().any(|s| s.contains(t_s))
    }

    pub fn probe_lost_at(&self, t_s: f64) -> bool {
        self.probe_dropout.iter().any(|s| s.contains(t_s))
    }
}

#[derive(Debug, Clone)]
pub struct SimProbe {
    pub cabin_c: f64,
    pub ambient_c: f64,
    pub lost: bool,
}

impl TemperatureProbe for SimProbe {
    fn detect(&mut self) -> bool {
        true
    }

    fn read_process_c(&mut self) -> f64 {
        if self.lost {
            SENSOR_DISCONNECTED_C
        } else {
            // One-wire probes resolve 1/16 °C.
            (self.cabin_c * 16.0).round() / 16.0
        }
    }

    fn read_ambient_c(&mut self) -> Option<f64> {
        Some(self.ambient_c)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimDoor {
    pub open: bool,
}

impl DoorSwitch for SimDoor {
    fn is_open(&mut self) -> bool {
        self.open
    }
}

#[derive(Debug, Clone)]
pub struct SimRelays {
    pub energized: Vec<bool>,
    pub switch_count: u64,
}

impl SimRelays {
    pub fn new(outputs: usize) -> Self {
        Self {
            energized: vec![false; outputs],
            switch_count: 0,
        }
    }
}

impl OutputDriver for SimRelays {
    type Error = String;

    fn write(&mut self, index: usize, energized: bool) -> Result<(), Self::Error> {
        let slot = self
            .energized
            .get_mut(index)
            .ok_or_else(|| format!("no relay {}", index + 1))?;
        if *slot != energized {
            self.switch_count += 1;
        }
        *slot = energized;
        Ok(())
    }
}

/// Mains voltage on the analog channels.
///
/// Channel `i` below the output count measures the voltage across heater
/// `i`, so it only carries mains while that relay is closed. Every other
/// channel sees the supply directly.
#[derive(Debug, Clone)]
pub struct SyntheticMains {
    pub now_us: u64,
    pub energized: Vec<bool>,
    pub mains_rms_v: f64,
    scale: AdcScale,
    selected: u8,
}

impl SyntheticMains {
    pub fn new(scale: AdcScale, outputs: usize) -> Self {
        Self {
            now_us: 0,
            energized: vec![false; outputs],
            mains_rms_v: 230.0,
            scale,
            selected: 0,
        }
    }

    fn channel_live(&self, channel: u8) -> bool {
        self.energized
            .get(usize::from(channel))
            .copied()
            .unwrap_or(true)
    }
}

impl MuxDriver for SyntheticMains {
    type Error = core::convert::Infallible;

    fn select(&mut self, address: MuxAddress) -> Result<(), Self::Error> {
        self.selected = match address {
            MuxAddress::Primary { sub } => sub,
            MuxAddress::Secondary { sub, .. } => MUX_WIDTH + sub,
        };
        Ok(())
    }

    fn read_raw(&mut self) -> Result<u16, Self::Error> {
        let mid = f64::from(self.scale.max_count) / 2.0;
        if !self.channel_live(self.selected) {
            return Ok(mid.round() as u16);
        }
        let t = self.now_us as f64 / 1e6;
        let amp_counts = self.mains_rms_v * SQRT_2 / self.scale.volts_per_count();
        let v = mid + amp_counts * (2.0 * PI * MAINS_HZ * t).sin();
        Ok(v.round().clamp(0.0, f64::from(self.scale.max_count)) as u16)
    }
}
