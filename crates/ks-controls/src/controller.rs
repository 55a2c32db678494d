//! PID arithmetic for the heater.
//!
//! The control loop only depends on the [`PidStep`] seam; [`PidLoop`] is the
//! implementation shipped with the firmware:
//! - filtered derivative (no kick from sensor noise)
//! - anti-windup: the integral stops accumulating while the output saturates
//! - output clamped to `[out_min, out_max]`
//!
//! Skipping [`PidStep::step`] freezes the integrator. The loop relies on
//! that during faults and interlocks so heating resumes smoothly.

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// Bounded controller output from process variable and setpoint.
pub trait PidStep {
    /// Advance by `dt` seconds and return the new output.
    fn step(&mut self, pv: f64, setpoint: f64, dt: f64) -> f64;
}

/// Gains and output limits, in the ideal (ISA) form.
///
/// `u = kp * (e + ∫e/ti + td * de/dt)` with `e = setpoint - pv` in °C.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PIDController {
    /// Output units per °C of error.
    pub kp: f64,
    /// Integral time, seconds.
    pub ti: f64,
    /// Derivative time, seconds.
    pub td: f64,
    /// Low-pass time constant on the derivative input, seconds.
    pub td_filter: f64,
    pub out_min: f64,
    pub out_max: f64,
    /// Bound on the integral accumulator in °C·s.
    #[serde(default)]
    pub integral_limit: Option<f64>,
}

impl PIDController {
    pub fn new(
        kp: f64,
        ti: f64,
        td: f64,
        td_filter: f64,
        out_min: f64,
        out_max: f64,
    ) -> ControlResult<Self> {
        let pid = Self {
            kp,
            ti,
            td,
            td_filter,
            out_min,
            out_max,
            integral_limit: None,
        };
        pid.validate()?;
        Ok(pid)
    }

    /// Check gains and limits; used again after deserializing.
    pub fn validate(&self) -> ControlResult<()> {
        let finite = [
            self.kp,
            self.ti,
            self.td,
            self.td_filter,
            self.out_min,
            self.out_max,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(ControlError::InvalidArg {
                what: "pid gains and limits must be finite",
            });
        }
        let checks = [
            (self.ti > 0.0, "ti must be positive"),
            (self.td >= 0.0, "td must be non-negative"),
            (self.td_filter > 0.0, "td_filter must be positive"),
            (self.out_min < self.out_max, "out_min must be less than out_max"),
            (
                self.integral_limit.is_none_or(|l| l.is_finite() && l > 0.0),
                "integral_limit must be positive",
            ),
        ];
        match checks.into_iter().find(|(ok, _)| !ok) {
            Some((_, what)) => Err(ControlError::InvalidArg { what }),
            None => Ok(()),
        }
    }

    /// One step of `dt` seconds (must be positive).
    ///
    /// Returns the next state and the clamped output. While the output sits
    /// on a limit the integral keeps its previous value.
    pub fn update(
        &self,
        state: &PIDControllerState,
        pv: f64,
        sp: f64,
        dt: f64,
    ) -> (PIDControllerState, f64) {
        let error = sp - pv;
        let integral = self.bounded_integral(state.integral + error * dt);

        let alpha = self.td_filter / (self.td_filter + dt);
        let filtered_error = alpha * state.filtered_error + (1.0 - alpha) * error;
        let slope = (filtered_error - state.filtered_error) / dt;

        let raw = self.kp * (error + integral / self.ti + self.td * slope);
        let output = raw.clamp(self.out_min, self.out_max);
        let integral = if output == raw { integral } else { state.integral };

        (
            PIDControllerState {
                integral,
                filtered_error,
            },
            output,
        )
    }

    fn bounded_integral(&self, integral: f64) -> f64 {
        self.integral_limit
            .map_or(integral, |limit| integral.clamp(-limit, limit))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PIDControllerState {
    /// Accumulated error, °C·s.
    pub integral: f64,
    /// Low-passed error the derivative is taken from.
    pub filtered_error: f64,
}

/// [`PIDController`] together with its running state.
#[derive(Debug, Clone, PartialEq)]
pub struct PidLoop {
    pub controller: PIDController,
    pub state: PIDControllerState,
    last_output: f64,
}

impl PidLoop {
    pub fn new(controller: PIDController) -> Self {
        Self {
            controller,
            state: PIDControllerState::default(),
            last_output: 0.0,
        }
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }
}

impl PidStep for PidLoop {
    fn step(&mut self, pv: f64, setpoint: f64, dt: f64) -> f64 {
        if dt <= 0.0 || !dt.is_finite() {
            // Nothing elapsed: hold the previous output.
            return self.last_output;
        }
        let (state, out) = self.controller.update(&self.state, pv, setpoint, dt);
        self.state = state;
        self.last_output = out;
        out
    }
}
