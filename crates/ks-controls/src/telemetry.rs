//! State-change telemetry.
//!
//! The control loop pushes an event only when something changed since the
//! previous tick. The wire encoding belongs to whoever implements
//! [`TelemetrySink`]; events are `Serialize` so a JSON sink is one line.

use std::borrow::Cow;

use ks_core::OutputId;
use serde::Serialize;

use crate::control_loop::LoopState;
use crate::output::OutputMode;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Temperature {
        process_c: f64,
        ambient_c: Option<f64>,
    },
    Setpoint {
        celsius: f64,
    },
    ControllerOutput {
        u: f64,
    },
    OutputState {
        #[serde(serialize_with = "serialize_output")]
        output: OutputId,
        mode: OutputMode,
        duty: f64,
        energized: bool,
    },
    Door {
        open: bool,
    },
    SensorFault {
        active: bool,
    },
    LoopState {
        state: LoopState,
    },
    /// Controller output arrived outside `[0, u_max]` and was clamped.
    StagerClamped {
        requested: f64,
        applied: f64,
    },
    WindowsSkipped {
        dropped: u64,
    },
    RmsVoltage {
        channel: u8,
        volts: f64,
    },
}

fn serialize_output<S: serde::Serializer>(id: &OutputId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u8(id.number())
}

impl TelemetryEvent {
    /// Flat key naming the quantity this event updates.
    pub fn key(&self) -> Cow<'static, str> {
        match self {
            Self::Temperature { .. } => "temp".into(),
            Self::Setpoint { .. } => "target".into(),
            Self::ControllerOutput { .. } => "pid".into(),
            Self::OutputState { output, .. } => format!("relay{}", output.number()).into(),
            Self::Door { .. } => "door".into(),
            Self::SensorFault { .. } => "sensor_fault".into(),
            Self::LoopState { .. } => "state".into(),
            Self::StagerClamped { .. } => "clamp".into(),
            Self::WindowsSkipped { .. } => "windows_skipped".into(),
            Self::RmsVoltage { channel, .. } => format!("volts{channel}").into(),
        }
    }

    /// Flat value for [`key`](Self::key).
    pub fn value(&self) -> String {
        match self {
            Self::Temperature { process_c, .. } => format!("{process_c:.2}"),
            Self::Setpoint { celsius } => format!("{celsius:.2}"),
            Self::ControllerOutput { u } => format!("{u:.2}"),
            Self::OutputState { energized, .. } => String::from(if *energized { "on" } else { "off" }),
            Self::Door { open } => open.to_string(),
            Self::SensorFault { active } => active.to_string(),
            Self::LoopState { state } => state.as_str().into(),
            Self::StagerClamped { applied, .. } => format!("{applied:.2}"),
            Self::WindowsSkipped { dropped } => dropped.to_string(),
            Self::RmsVoltage { volts, .. } => format!("{volts:.1}"),
        }
    }
}

/// Push-style consumer of telemetry events.
pub trait TelemetrySink {
    fn publish(&mut self, event: &TelemetryEvent);
}

impl<F: FnMut(&TelemetryEvent)> TelemetrySink for F {
    fn publish(&mut self, event: &TelemetryEvent) {
        self(event)
    }
}

/// Sink that keeps every event, for tests and the simulator.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<TelemetryEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&mut self) -> Vec<TelemetryEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn count_key(&self, key: &str) -> usize {
        self.events.iter().filter(|e| e.key() == key).count()
    }
}

impl TelemetrySink for RecordingSink {
    fn publish(&mut self, event: &TelemetryEvent) {
        self.events.push(event.clone());
    }
}
