//! Heater control for the kiuas controller.
//!
//! Turns a bounded PID output into on/off commands for several heating
//! outputs of unequal power, under a safety interlock.
//!
//! # Architecture
//!
//! - [`controller`]: PID arithmetic behind the [`PidStep`] seam
//! - [`stager`]: weighted duty staging across outputs
//! - [`window`]: time-proportioning window turning duty into on/off
//! - [`interlock`]: door and sensor-fault override
//! - [`control_loop`]: the per-tick state machine tying these together
//! - [`telemetry`]: de-duplicated state-change events
//!
//! Everything here runs in the cooperative main context. Outputs have a
//! single writer, so none of it needs locking.

pub mod control_loop;
pub mod controller;
pub mod error;
pub mod interlock;
pub mod output;
pub mod stager;
pub mod telemetry;
pub mod window;

pub use control_loop::{ControlLoop, LoopConfig, LoopState, TickInput};
pub use controller::{PIDController, PIDControllerState, PidLoop, PidStep};
pub use error::{ControlError, ControlResult};
pub use interlock::{InterlockEdge, SENSOR_DISCONNECTED_C, SafetyInterlock, is_sensor_fault};
pub use output::{OutputMode, PhysicalOutput};
pub use stager::{RelayStager, StagingPolicy};
pub use telemetry::{RecordingSink, TelemetryEvent, TelemetrySink};
pub use window::{ControlWindow, WindowAdvance};
