//! Per-tick heater control state machine.
//!
//! ```text
//!            enable                  door opens
//! DISABLED ─────────▶ ENABLED_NORMAL ──────────▶ ENABLED_INTERLOCKED
//!     ▲    ◀─────────        ▲  │    ◀──────────
//!     │     disable          │  │ probe fault      door closes
//!     │                      │  ▼
//!     └──── disable ────── FAULT (clears when the probe reads again)
//! ```
//!
//! The state is derived from the enable flag and the interlock every tick.
//! Outside ENABLED_NORMAL the controller output is pinned to zero and the
//! PID is not stepped, so its integrator holds its value.

use ks_core::{OutputId, ensure_finite};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::controller::PidStep;
use crate::error::{ControlError, ControlResult};
use crate::interlock::{InterlockEdge, SafetyInterlock};
use crate::output::{OutputMode, PhysicalOutput};
use crate::stager::{RelayStager, StagingPolicy};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::window::{ControlWindow, WindowAdvance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Disabled,
    EnabledNormal,
    EnabledInterlocked,
    Fault,
}

impl LoopState {
    /// A probe fault outranks an open door.
    pub fn derive(enabled: bool, interlock: &SafetyInterlock) -> Self {
        if !enabled {
            Self::Disabled
        } else if interlock.sensor_fault() {
            Self::Fault
        } else if interlock.door_open() {
            Self::EnabledInterlocked
        } else {
            Self::EnabledNormal
        }
    }

    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::Disabled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::EnabledNormal => "enabled_normal",
            Self::EnabledInterlocked => "enabled_interlocked",
            Self::Fault => "fault",
        }
    }
}

/// Static parameters of the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Upper bound of the controller output.
    pub u_max: f64,
    /// Relative power of each output, lowest stage first.
    pub weights: Vec<f64>,
    /// Time-proportioning window length.
    pub window_ms: u64,
    /// Nominal tick period; also caps the PID step after a stall.
    pub tick_ms: u64,
    /// Setpoints must stay below this.
    pub temp_absmax_c: f64,
    pub policy: StagingPolicy,
    /// Per-output switch-on levels for direct-threshold staging; the top of
    /// each output's slice when unset.
    pub thresholds: Option<Vec<f64>>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            u_max: 100.0,
            weights: vec![1.0, 2.0, 1.0],
            window_ms: 10_000,
            tick_ms: 1_000,
            temp_absmax_c: 125.0,
            policy: StagingPolicy::default(),
            thresholds: None,
        }
    }
}

/// Readings taken at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInput {
    pub now_ms: u64,
    pub process_c: f64,
    pub ambient_c: Option<f64>,
    pub door_open: bool,
}

/// Longest PID step after a stall, in nominal ticks.
const MAX_DT_TICKS: u64 = 4;

/// Values last sent out, for de-duplication.
#[derive(Debug, Clone, PartialEq)]
struct Published {
    process_c: f64,
    ambient_c: Option<f64>,
    setpoint_c: f64,
    u: f64,
    outputs: Vec<(OutputMode, f64, bool)>,
}

fn same(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

fn same_opt(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same(a, b),
        (None, None) => true,
        _ => false,
    }
}

pub struct ControlLoop<P> {
    config: LoopConfig,
    pid: P,
    stager: RelayStager,
    window: ControlWindow,
    interlock: SafetyInterlock,
    outputs: Vec<PhysicalOutput>,
    enabled: bool,
    setpoint_c: f64,
    process_c: f64,
    ambient_c: Option<f64>,
    u: f64,
    state: LoopState,
    last_tick_ms: Option<u64>,
    published: Option<Published>,
}

impl<P: PidStep> ControlLoop<P> {
    /// Build a disabled loop. `modes` gives each output's boot mode; an
    /// empty slice means every output starts in auto.
    pub fn new(
        config: LoopConfig,
        pid: P,
        setpoint_c: f64,
        modes: &[OutputMode],
        start_ms: u64,
    ) -> ControlResult<Self> {
        let mut stager = RelayStager::new(&config.weights, config.u_max)?;
        if let Some(thresholds) = &config.thresholds {
            stager = stager.with_thresholds(thresholds)?;
        }
        let window = ControlWindow::new(config.window_ms, start_ms)?;
        if config.tick_ms == 0 {
            return Err(ControlError::InvalidArg {
                what: "tick period must be positive",
            });
        }
        if !modes.is_empty() && modes.len() != config.weights.len() {
            return Err(ControlError::InvalidArg {
                what: "one boot mode per output is required",
            });
        }
        let outputs = config
            .weights
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let mode = modes.get(i).copied().unwrap_or_default();
                Ok(PhysicalOutput::new(OutputId::from_index(i)?, w, mode))
            })
            .collect::<ControlResult<Vec<_>>>()?;

        let mut lp = Self {
            config,
            pid,
            stager,
            window,
            interlock: SafetyInterlock::new(),
            outputs,
            enabled: false,
            setpoint_c: 0.0,
            process_c: f64::NAN,
            ambient_c: None,
            u: 0.0,
            state: LoopState::Disabled,
            last_tick_ms: None,
            published: None,
        };
        lp.set_setpoint(setpoint_c)?;
        Ok(lp)
    }

    pub fn enable(&mut self) {
        if !self.enabled {
            info!("heating enabled");
        }
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        if self.enabled {
            info!("heating disabled");
        }
        self.enabled = false;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.enable();
        } else {
            self.disable();
        }
    }

    /// Accept a setpoint strictly inside `(0, temp_absmax_c)`.
    pub fn set_setpoint(&mut self, celsius: f64) -> ControlResult<()> {
        let celsius = ensure_finite(celsius, "setpoint")?;
        if celsius <= 0.0 || celsius >= self.config.temp_absmax_c {
            return Err(ControlError::SetpointOutOfRange {
                value: celsius,
                max: self.config.temp_absmax_c,
            });
        }
        self.setpoint_c = celsius;
        Ok(())
    }

    pub fn set_mode(&mut self, output: OutputId, mode: OutputMode) -> ControlResult<()> {
        let count = self.outputs.len();
        let out = self
            .outputs
            .get_mut(output.index())
            .ok_or(ControlError::UnknownOutput {
                number: output.number(),
                count,
            })?;
        if out.mode != mode {
            info!(output = output.number(), %mode, "output mode changed");
        }
        out.mode = mode;
        Ok(())
    }

    /// Run one control tick and publish whatever changed.
    pub fn tick(&mut self, input: TickInput, sink: &mut impl TelemetrySink) -> LoopState {
        self.process_c = input.process_c;
        self.ambient_c = input.ambient_c;

        for edge in self.interlock.update(input.door_open, input.process_c) {
            let event = match edge {
                InterlockEdge::DoorOpened => TelemetryEvent::Door { open: true },
                InterlockEdge::DoorClosed => TelemetryEvent::Door { open: false },
                InterlockEdge::SensorFault => TelemetryEvent::SensorFault { active: true },
                InterlockEdge::SensorRecovered => TelemetryEvent::SensorFault { active: false },
            };
            sink.publish(&event);
        }

        let next = LoopState::derive(self.enabled, &self.interlock);
        if next != self.state {
            info!(from = ?self.state, to = ?next, "control state changed");
            self.state = next;
            sink.publish(&TelemetryEvent::LoopState { state: next });
        }

        let dt = self.step_seconds(input.now_ms);
        let requested = if self.state == LoopState::EnabledNormal {
            self.pid.step(self.process_c, self.setpoint_c, dt)
        } else {
            0.0
        };
        let (u, clamped) = self.stager.clamp_input(requested);
        if clamped {
            warn!(requested, applied = u, "controller output out of range, clamped");
            sink.publish(&TelemetryEvent::StagerClamped {
                requested,
                applied: u,
            });
        }
        self.u = u;

        if let WindowAdvance::Skipped { dropped } = self.window.advance(input.now_ms) {
            sink.publish(&TelemetryEvent::WindowsSkipped { dropped });
        }
        self.stager.stage(
            u,
            &mut self.outputs,
            &self.window,
            input.now_ms,
            self.config.policy,
        );
        if !self.state.is_enabled() {
            self.outputs.iter_mut().for_each(PhysicalOutput::de_energize);
        }
        self.interlock.apply(&mut self.outputs);

        debug!(
            state = ?self.state,
            pv = self.process_c,
            sp = self.setpoint_c,
            u,
            "tick"
        );
        self.publish_changes(sink);
        self.last_tick_ms = Some(input.now_ms);
        self.state
    }

    /// PID step length: time since the last tick, capped after stalls.
    fn step_seconds(&self, now_ms: u64) -> f64 {
        let elapsed_ms = match self.last_tick_ms {
            Some(last) => now_ms.saturating_sub(last),
            None => self.config.tick_ms,
        };
        elapsed_ms.min(self.config.tick_ms * MAX_DT_TICKS) as f64 / 1000.0
    }

    fn publish_changes(&mut self, sink: &mut impl TelemetrySink) {
        let current = Published {
            process_c: self.process_c,
            ambient_c: self.ambient_c,
            setpoint_c: self.setpoint_c,
            u: self.u,
            outputs: self
                .outputs
                .iter()
                .map(|o| (o.mode, o.duty, o.energized))
                .collect(),
        };
        let prev = self.published.as_ref();

        if prev.is_none_or(|p| {
            !same(p.process_c, current.process_c) || !same_opt(p.ambient_c, current.ambient_c)
        }) {
            sink.publish(&TelemetryEvent::Temperature {
                process_c: current.process_c,
                ambient_c: current.ambient_c,
            });
        }
        if prev.is_none_or(|p| !same(p.setpoint_c, current.setpoint_c)) {
            sink.publish(&TelemetryEvent::Setpoint {
                celsius: current.setpoint_c,
            });
        }
        if prev.is_none_or(|p| !same(p.u, current.u)) {
            sink.publish(&TelemetryEvent::ControllerOutput { u: current.u });
        }
        for (i, out) in self.outputs.iter().enumerate() {
            let now = current.outputs[i];
            let changed = prev.is_none_or(|p| {
                p.outputs.get(i).is_none_or(|&(mode, duty, on)| {
                    mode != now.0 || !same(duty, now.1) || on != now.2
                })
            });
            if changed {
                sink.publish(&TelemetryEvent::OutputState {
                    output: out.id(),
                    mode: out.mode,
                    duty: out.duty,
                    energized: out.energized,
                });
            }
        }
        self.published = Some(current);
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn u(&self) -> f64 {
        self.u
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint_c
    }

    pub fn process_c(&self) -> f64 {
        self.process_c
    }

    pub fn ambient_c(&self) -> Option<f64> {
        self.ambient_c
    }

    pub fn outputs(&self) -> &[PhysicalOutput] {
        &self.outputs
    }

    pub fn interlock(&self) -> &SafetyInterlock {
        &self.interlock
    }

    pub fn window(&self) -> &ControlWindow {
        &self.window
    }

    pub fn stager(&self) -> &RelayStager {
        &self.stager
    }

    pub fn pid(&self) -> &P {
        &self.pid
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingSink;

    /// PID stand-in returning a fixed output and counting calls.
    struct Fixed {
        out: f64,
        calls: usize,
    }

    impl PidStep for Fixed {
        fn step(&mut self, _pv: f64, _sp: f64, _dt: f64) -> f64 {
            self.calls += 1;
            self.out
        }
    }

    fn fixed(out: f64) -> ControlLoop<Fixed> {
        ControlLoop::new(LoopConfig::default(), Fixed { out, calls: 0 }, 75.0, &[], 0).unwrap()
    }

    fn input(now_ms: u64, process_c: f64, door_open: bool) -> TickInput {
        TickInput {
            now_ms,
            process_c,
            ambient_c: None,
            door_open,
        }
    }

    #[test]
    fn configured_thresholds_drive_direct_staging() {
        let config = LoopConfig {
            policy: StagingPolicy::DirectThreshold,
            thresholds: Some(vec![25.0, 50.0, 100.0]),
            ..LoopConfig::default()
        };
        let mut lp = ControlLoop::new(config, Fixed { out: 60.0, calls: 0 }, 75.0, &[], 0).unwrap();
        lp.enable();
        lp.tick(input(0, 20.0, false), &mut RecordingSink::new());
        let states: Vec<bool> = lp.outputs().iter().map(|o| o.energized).collect();
        assert_eq!(states, vec![true, true, false]);

        let bad = LoopConfig {
            thresholds: Some(vec![25.0, 50.0]),
            ..LoopConfig::default()
        };
        assert!(ControlLoop::new(bad, Fixed { out: 0.0, calls: 0 }, 75.0, &[], 0).is_err());
    }

    #[test]
    fn starts_disabled_with_everything_off() {
        let mut lp = fixed(100.0);
        let mut sink = RecordingSink::new();
        assert_eq!(lp.tick(input(0, 20.0, false), &mut sink), LoopState::Disabled);
        assert_eq!(lp.u(), 0.0);
        assert_eq!(lp.pid().calls, 0);
        assert!(lp.outputs().iter().all(|o| !o.energized));
    }

    #[test]
    fn disabled_overrides_forced_on() {
        let mut lp = fixed(0.0);
        lp.set_mode(OutputId::from_number(1).unwrap(), OutputMode::ForcedOn)
            .unwrap();
        lp.tick(input(0, 20.0, false), &mut RecordingSink::new());
        assert!(!lp.outputs()[0].energized);

        lp.enable();
        lp.tick(input(1000, 20.0, false), &mut RecordingSink::new());
        assert!(lp.outputs()[0].energized);
    }

    #[test]
    fn enable_runs_pid_and_stages() {
        let mut lp = fixed(50.0);
        lp.enable();
        let mut sink = RecordingSink::new();
        assert_eq!(lp.tick(input(0, 20.0, false), &mut sink), LoopState::EnabledNormal);
        assert_eq!(lp.u(), 50.0);
        let duties: Vec<f64> = lp.outputs().iter().map(|o| o.duty).collect();
        assert_eq!(duties, vec![100.0, 50.0, 0.0]);
        assert!(lp.outputs()[0].energized);
        assert!(lp.outputs()[1].energized);
        assert!(!lp.outputs()[2].energized);
    }

    #[test]
    fn door_pins_output_and_skips_pid() {
        let mut lp = fixed(80.0);
        lp.enable();
        lp.set_mode(OutputId::from_number(3).unwrap(), OutputMode::ForcedOn)
            .unwrap();
        lp.tick(input(0, 60.0, false), &mut RecordingSink::new());
        let calls = lp.pid().calls;

        let mut sink = RecordingSink::new();
        assert_eq!(
            lp.tick(input(1000, 60.0, true), &mut sink),
            LoopState::EnabledInterlocked
        );
        assert_eq!(lp.u(), 0.0);
        assert_eq!(lp.pid().calls, calls);
        assert!(lp.outputs().iter().all(|o| !o.energized));
        assert!(sink.events.contains(&TelemetryEvent::Door { open: true }));

        assert_eq!(
            lp.tick(input(2000, 60.0, false), &mut sink),
            LoopState::EnabledNormal
        );
        assert_eq!(lp.pid().calls, calls + 1);
    }

    #[test]
    fn probe_fault_outranks_door() {
        let mut lp = fixed(80.0);
        lp.enable();
        let mut sink = RecordingSink::new();
        assert_eq!(
            lp.tick(input(0, crate::SENSOR_DISCONNECTED_C, true), &mut sink),
            LoopState::Fault
        );
        assert_eq!(sink.count_key("sensor_fault"), 1);
        assert_eq!(
            lp.tick(input(1000, 70.0, true), &mut sink),
            LoopState::EnabledInterlocked
        );
        assert_eq!(sink.count_key("sensor_fault"), 2);
    }

    #[test]
    fn output_telemetry_is_deduplicated() {
        let mut lp = fixed(100.0);
        lp.enable();
        let mut sink = RecordingSink::new();
        lp.tick(input(0, 70.0, false), &mut sink);
        assert_eq!(sink.count_key("relay1"), 1);
        sink.drain();

        lp.tick(input(1000, 70.0, false), &mut sink);
        assert!(sink.events.is_empty(), "unexpected {:?}", sink.events);
    }

    #[test]
    fn clamp_is_always_reported() {
        let mut lp = fixed(140.0);
        lp.enable();
        let mut sink = RecordingSink::new();
        lp.tick(input(0, 70.0, false), &mut sink);
        lp.tick(input(1000, 70.0, false), &mut sink);
        assert_eq!(sink.count_key("clamp"), 2);
        assert_eq!(lp.u(), 100.0);
    }

    #[test]
    fn setpoint_validation() {
        let mut lp = fixed(0.0);
        assert!(lp.set_setpoint(80.0).is_ok());
        assert!(matches!(
            lp.set_setpoint(125.0),
            Err(ControlError::SetpointOutOfRange { .. })
        ));
        assert!(lp.set_setpoint(0.0).is_err());
        assert!(lp.set_setpoint(f64::NAN).is_err());
        assert_eq!(lp.setpoint(), 80.0);
    }

    #[test]
    fn unknown_output_rejected() {
        let mut lp = fixed(0.0);
        let err = lp
            .set_mode(OutputId::from_number(4).unwrap(), OutputMode::ForcedOn)
            .unwrap_err();
        assert_eq!(err, ControlError::UnknownOutput { number: 4, count: 3 });
    }

    #[test]
    fn boot_modes_must_match_outputs() {
        let err = ControlLoop::new(
            LoopConfig::default(),
            Fixed { out: 0.0, calls: 0 },
            75.0,
            &[OutputMode::Auto],
            0,
        );
        assert!(err.is_err());
    }
}
