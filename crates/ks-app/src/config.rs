//! Controller configuration file.
//!
//! Every section has defaults matching the reference board, so a file only
//! needs the values that differ. Files are validated on load and before
//! saving.

use std::path::Path;

use ks_acquire::{AdcScale, CascadeLayout, SAFE_SAMPLE_RATE_CEILING_HZ, SamplerConfig};
use ks_controls::{LoopConfig, PIDController, StagingPolicy};
use ks_core::ChannelId;
use serde::{Deserialize, Serialize};

use crate::command::CommandLimits;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KiuasConfig {
    pub control: ControlSection,
    pub pid: PIDController,
    pub sampler: SamplerSection,
    pub adc: AdcSection,
    pub auth: AuthSection,
}

impl Default for KiuasConfig {
    fn default() -> Self {
        Self {
            control: ControlSection::default(),
            pid: PIDController {
                kp: 50.0,
                ti: 400.0,
                td: 20.0,
                td_filter: 10.0,
                out_min: 0.0,
                out_max: 100.0,
                integral_limit: None,
            },
            sampler: SamplerSection::default(),
            adc: AdcSection::default(),
            auth: AuthSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlSection {
    /// Setpoint used until one is stored.
    pub setpoint_c: f64,
    pub temp_absmax_c: f64,
    pub u_max: f64,
    /// Relative power of each output, lowest stage first.
    pub weights: Vec<f64>,
    pub window_ms: u64,
    pub tick_ms: u64,
    pub status_interval_ms: u64,
    /// Pending command batches accepted before new ones are refused.
    pub command_queue: usize,
    /// Overrides the build's default staging policy.
    pub policy: Option<StagingPolicy>,
    /// Per-output switch-on levels for direct-threshold staging.
    pub thresholds: Option<Vec<f64>>,
}

impl Default for ControlSection {
    fn default() -> Self {
        let lp = LoopConfig::default();
        Self {
            setpoint_c: 75.0,
            temp_absmax_c: lp.temp_absmax_c,
            u_max: lp.u_max,
            weights: lp.weights,
            window_ms: lp.window_ms,
            tick_ms: lp.tick_ms,
            status_interval_ms: 10_000,
            command_queue: 16,
            policy: None,
            thresholds: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplerSection {
    pub rate_hz: u32,
    pub allow_above_ceiling: bool,
    pub snapshot_budget_us: u32,
    pub channels: Vec<ChannelId>,
    pub cascade_input: u8,
}

impl Default for SamplerSection {
    fn default() -> Self {
        let sc = SamplerConfig::default();
        Self {
            rate_hz: sc.rate_hz,
            allow_above_ceiling: sc.allow_above_ceiling,
            snapshot_budget_us: sc.snapshot_budget_us,
            channels: sc.channels,
            cascade_input: sc.layout.cascade_input(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdcSection {
    pub reference_volts: f64,
    pub max_count: u16,
    pub calibration: f64,
}

impl Default for AdcSection {
    fn default() -> Self {
        let s = AdcScale::default();
        Self {
            reference_volts: s.reference_volts,
            max_count: s.max_count,
            calibration: s.calibration,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    /// Shared HMAC secret for inbound commands.
    pub secret: String,
}

impl KiuasConfig {
    pub fn loop_config(&self) -> LoopConfig {
        let c = &self.control;
        LoopConfig {
            u_max: c.u_max,
            weights: c.weights.clone(),
            window_ms: c.window_ms,
            tick_ms: c.tick_ms,
            temp_absmax_c: c.temp_absmax_c,
            policy: c.policy.unwrap_or_default(),
            thresholds: c.thresholds.clone(),
        }
    }

    pub fn sampler_config(&self) -> AppResult<SamplerConfig> {
        let s = &self.sampler;
        let layout = CascadeLayout::new(s.cascade_input)
            .map_err(|e| AppError::Config(format!("sampler.cascade_input: {e}")))?;
        Ok(SamplerConfig {
            rate_hz: s.rate_hz,
            allow_above_ceiling: s.allow_above_ceiling,
            snapshot_budget_us: s.snapshot_budget_us,
            channels: s.channels.clone(),
            layout,
        })
    }

    /// Limits inbound commands are checked against before queueing.
    pub fn command_limits(&self) -> CommandLimits {
        CommandLimits {
            temp_absmax_c: self.control.temp_absmax_c,
            outputs: self.control.weights.len(),
        }
    }

    pub fn adc_scale(&self) -> AdcScale {
        AdcScale {
            reference_volts: self.adc.reference_volts,
            max_count: self.adc.max_count,
            calibration: self.adc.calibration,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        let c = &self.control;
        let invalid = |field: &str, reason: &str| Err(AppError::Config(format!("{field}: {reason}")));

        if !c.temp_absmax_c.is_finite() || c.temp_absmax_c <= 0.0 {
            return invalid("control.temp_absmax_c", "must be positive");
        }
        if !(c.setpoint_c > 0.0 && c.setpoint_c < c.temp_absmax_c) {
            return invalid("control.setpoint_c", "must lie strictly between 0 and temp_absmax_c");
        }
        if c.tick_ms == 0 {
            return invalid("control.tick_ms", "must be positive");
        }
        if c.window_ms < c.tick_ms {
            return invalid("control.window_ms", "must be at least one tick");
        }
        if c.status_interval_ms == 0 {
            return invalid("control.status_interval_ms", "must be positive");
        }
        if c.command_queue == 0 {
            return invalid("control.command_queue", "must hold at least one batch");
        }
        if c.weights.len() > u8::MAX as usize {
            return invalid("control.weights", "too many outputs");
        }
        // The stager checks weights, u_max and thresholds.
        let stager = ks_controls::RelayStager::new(&c.weights, c.u_max)?;
        if let Some(thresholds) = &c.thresholds {
            stager.with_thresholds(thresholds)?;
        }

        self.pid.validate()?;
        if self.pid.out_min < 0.0 || self.pid.out_max > c.u_max {
            return invalid("pid", "output limits must lie within [0, u_max]");
        }

        self.sampler_config()?.validate()?;
        if self.sampler.rate_hz > SAFE_SAMPLE_RATE_CEILING_HZ {
            tracing::warn!(
                rate_hz = self.sampler.rate_hz,
                ceiling_hz = SAFE_SAMPLE_RATE_CEILING_HZ,
                "sample rate above the validated ceiling"
            );
        }

        let a = &self.adc;
        if !(a.reference_volts.is_finite() && a.reference_volts > 0.0) {
            return invalid("adc.reference_volts", "must be positive");
        }
        if a.max_count == 0 {
            return invalid("adc.max_count", "must be positive");
        }
        if !(a.calibration.is_finite() && a.calibration > 0.0) {
            return invalid("adc.calibration", "must be positive");
        }

        if self.auth.secret.is_empty() {
            return invalid("auth.secret", "must be set");
        }
        Ok(())
    }
}

pub fn load_yaml(path: &Path) -> AppResult<KiuasConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| AppError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let config: KiuasConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

pub fn save_yaml(path: &Path, config: &KiuasConfig) -> AppResult<()> {
    config.validate()?;
    let content = serde_yaml::to_string(config)?;
    std::fs::write(path, content).map_err(|source| AppError::FileWrite {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
