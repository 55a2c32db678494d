//! Full status snapshot.

use ks_controls::{ControlLoop, LoopState, OutputMode, PidStep};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputStatus {
    /// 1-based, as commands address it.
    pub number: u8,
    /// Relative power compared to the other outputs.
    pub weight: f64,
    pub mode: OutputMode,
    pub duty: f64,
    pub energized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelVolts {
    pub channel: u8,
    pub volts: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub now_ms: u64,
    pub state: LoopState,
    pub enabled: bool,
    pub temp_c: f64,
    pub ambient_c: Option<f64>,
    pub target_c: f64,
    pub pid: f64,
    pub door_open: bool,
    pub sensor_fault: bool,
    pub outputs: Vec<OutputStatus>,
    pub volts: Vec<ChannelVolts>,
}

impl StatusReport {
    pub fn capture<P: PidStep>(lp: &ControlLoop<P>, volts: Vec<ChannelVolts>, now_ms: u64) -> Self {
        Self {
            now_ms,
            state: lp.state(),
            enabled: lp.is_enabled(),
            temp_c: lp.process_c(),
            ambient_c: lp.ambient_c(),
            target_c: lp.setpoint(),
            pid: lp.u(),
            door_open: lp.interlock().door_open(),
            sensor_fault: lp.interlock().sensor_fault(),
            outputs: lp
                .outputs()
                .iter()
                .map(|o| OutputStatus {
                    number: o.id().number(),
                    weight: o.weight(),
                    mode: o.mode,
                    duty: o.duty,
                    energized: o.energized,
                })
                .collect(),
            volts,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
