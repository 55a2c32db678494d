//! Weighted staging of one controller output across several heating outputs.
//!
//! Each output owns a slice of `[0, u_max]` proportional to its relative
//! power. With weights `[1, 2, 1]` and `u_max = 100` the slices are
//! `0..25`, `25..75` and `75..100`. Inside its slice an output's duty ramps
//! linearly 0 → 100 %; below it the output is off, above it fully on. So a
//! rising `u` commits outputs strictly in index order and never lowers any
//! output's duty.

use serde::{Deserialize, Serialize};

use ks_core::clamp_reported;

use crate::error::{ControlError, ControlResult};
use crate::output::{OutputMode, PhysicalOutput};
use crate::window::ControlWindow;

/// How staged duty becomes switching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingPolicy {
    /// Duty applied over the control window. Needs solid-state relays.
    TimeProportional,
    /// Output on once `u` reaches its threshold (the top of its slice
    /// unless configured). For contactors and other electromechanical
    /// relays that cannot take window switching.
    DirectThreshold,
}

impl Default for StagingPolicy {
    fn default() -> Self {
        if cfg!(feature = "relay-threshold") {
            Self::DirectThreshold
        } else {
            Self::TimeProportional
        }
    }
}

/// Maps a bounded controller output to per-output duty.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayStager {
    u_max: f64,
    /// `(start, end)` of each output's slice of `[0, u_max]`.
    spans: Vec<(f64, f64)>,
    /// Switch-on level of each output under [`StagingPolicy::DirectThreshold`].
    thresholds: Vec<f64>,
}

impl RelayStager {
    pub fn new(weights: &[f64], u_max: f64) -> ControlResult<Self> {
        if weights.is_empty() {
            return Err(ControlError::InvalidArg {
                what: "at least one output weight is required",
            });
        }
        if !u_max.is_finite() || u_max <= 0.0 {
            return Err(ControlError::InvalidArg {
                what: "u_max must be positive",
            });
        }
        if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(ControlError::InvalidArg {
                what: "output weights must be positive",
            });
        }
        let total: f64 = weights.iter().sum();
        let mut cumulative = 0.0;
        let spans = weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let start = u_max * cumulative / total;
                cumulative += w;
                // Pin the last slice to u_max exactly; summing floats may not.
                let end = if i + 1 == weights.len() {
                    u_max
                } else {
                    u_max * cumulative / total
                };
                (start, end)
            })
            .collect::<Vec<(f64, f64)>>();
        let thresholds = spans.iter().map(|&(_, end)| end).collect();
        Ok(Self {
            u_max,
            spans,
            thresholds,
        })
    }

    /// Replace the default thresholds: one per output, inside `[0, u_max]`
    /// and non-decreasing so outputs still commit in index order.
    pub fn with_thresholds(mut self, thresholds: &[f64]) -> ControlResult<Self> {
        if thresholds.len() != self.spans.len() {
            return Err(ControlError::InvalidArg {
                what: "one relay threshold per output is required",
            });
        }
        if thresholds
            .iter()
            .any(|t| !t.is_finite() || *t < 0.0 || *t > self.u_max)
        {
            return Err(ControlError::InvalidArg {
                what: "relay thresholds must lie within [0, u_max]",
            });
        }
        if thresholds.windows(2).any(|w| w[1] < w[0]) {
            return Err(ControlError::InvalidArg {
                what: "relay thresholds must not decrease",
            });
        }
        self.thresholds = thresholds.to_vec();
        Ok(self)
    }

    pub fn u_max(&self) -> f64 {
        self.u_max
    }

    pub fn outputs(&self) -> usize {
        self.spans.len()
    }

    /// Slice of `[0, u_max]` owned by output `index`.
    pub fn span(&self, index: usize) -> Option<(f64, f64)> {
        self.spans.get(index).copied()
    }

    /// Clamp `u` into `[0, u_max]`; the flag is set when it had to move.
    pub fn clamp_input(&self, u: f64) -> (f64, bool) {
        clamp_reported(u, 0.0, self.u_max)
    }

    /// Staged duty (percent) of output `index` for an in-range `u`.
    pub fn duty(&self, index: usize, u: f64) -> f64 {
        let Some((start, end)) = self.span(index) else {
            return 0.0;
        };
        if u <= start {
            0.0
        } else if u >= end {
            100.0
        } else {
            ((u - start) / (end - start) * 100.0).clamp(0.0, 100.0)
        }
    }

    /// Duty of every output for `u`, clamping it first.
    pub fn duties(&self, u: f64) -> Vec<f64> {
        let (u, _) = self.clamp_input(u);
        (0..self.spans.len()).map(|i| self.duty(i, u)).collect()
    }

    /// Level of `u` at which output `index` switches on under
    /// [`StagingPolicy::DirectThreshold`].
    pub fn threshold(&self, index: usize) -> f64 {
        self.thresholds.get(index).copied().unwrap_or(f64::INFINITY)
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    /// Write duty and energization into `outputs` for an in-range `u`.
    ///
    /// Modes are honored here; the interlock is applied afterwards by the
    /// caller and overrides everything this sets.
    pub fn stage(
        &self,
        u: f64,
        outputs: &mut [PhysicalOutput],
        window: &ControlWindow,
        now_ms: u64,
        policy: StagingPolicy,
    ) {
        for (i, out) in outputs.iter_mut().enumerate() {
            let (duty, energized) = match (out.mode, policy) {
                (OutputMode::ForcedOn, _) => (100.0, true),
                (OutputMode::ForcedOff, _) => (0.0, false),
                (OutputMode::Auto, StagingPolicy::TimeProportional) => {
                    let duty = self.duty(i, u);
                    (duty, window.is_on(duty, now_ms))
                }
                (OutputMode::Auto, StagingPolicy::DirectThreshold) => {
                    let on = u >= self.threshold(i);
                    (if on { 100.0 } else { 0.0 }, on)
                }
            };
            out.duty = duty;
            out.energized = energized;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ks_core::OutputId;
    use proptest::prelude::*;

    fn reference() -> RelayStager {
        RelayStager::new(&[1.0, 2.0, 1.0], 100.0).unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn reference_spans() {
        let s = reference();
        assert_eq!(s.span(0), Some((0.0, 25.0)));
        assert_eq!(s.span(1), Some((25.0, 75.0)));
        assert_eq!(s.span(2), Some((75.0, 100.0)));
        assert_eq!(s.span(3), None);
    }

    #[test]
    fn first_quarter_drives_output_zero_only() {
        let s = reference();
        for u in [0.0, 1.0, 10.0, 24.9] {
            let d = s.duties(u);
            assert!(close(d[0], 4.0 * u), "u={u} d={d:?}");
            assert_eq!(d[1], 0.0);
            assert_eq!(d[2], 0.0);
        }
    }

    #[test]
    fn middle_band_ramps_output_one() {
        let s = reference();
        for u in [25.0, 40.0, 50.0, 75.0] {
            let d = s.duties(u);
            assert_eq!(d[0], 100.0);
            assert!(close(d[1], 2.0 * (u - 25.0)), "u={u} d={d:?}");
            assert_eq!(d[2], 0.0);
        }
    }

    #[test]
    fn top_band_ramps_output_two() {
        let s = reference();
        for u in [75.0, 80.0, 99.0, 100.0] {
            let d = s.duties(u);
            assert_eq!(d[0], 100.0);
            assert_eq!(d[1], 100.0);
            assert!(close(d[2], 4.0 * (u - 75.0)), "u={u} d={d:?}");
        }
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        let s = reference();
        assert_eq!(s.clamp_input(130.0), (100.0, true));
        assert_eq!(s.clamp_input(-5.0), (0.0, true));
        assert_eq!(s.clamp_input(42.0), (42.0, false));
        assert_eq!(s.duties(250.0), vec![100.0, 100.0, 100.0]);
    }

    #[test]
    fn invalid_weights_rejected() {
        assert!(RelayStager::new(&[], 100.0).is_err());
        assert!(RelayStager::new(&[1.0, 0.0], 100.0).is_err());
        assert!(RelayStager::new(&[1.0, f64::NAN], 100.0).is_err());
        assert!(RelayStager::new(&[1.0], 0.0).is_err());
    }

    #[test]
    fn contactor_board_thresholds() {
        // Relays at 1, 2 and 4 on a 0..4 scale.
        let s = reference().with_thresholds(&[25.0, 50.0, 100.0]).unwrap();
        assert_eq!(s.thresholds(), &[25.0, 50.0, 100.0]);
        let window = ControlWindow::new(1000, 0).unwrap();
        let mut outputs: Vec<PhysicalOutput> = (0..3)
            .map(|i| PhysicalOutput::new(OutputId::from_index(i).unwrap(), 1.0, OutputMode::Auto))
            .collect();

        s.stage(60.0, &mut outputs, &window, 0, StagingPolicy::DirectThreshold);
        let states: Vec<bool> = outputs.iter().map(|o| o.energized).collect();
        assert_eq!(states, vec![true, true, false]);

        s.stage(49.0, &mut outputs, &window, 0, StagingPolicy::DirectThreshold);
        let states: Vec<bool> = outputs.iter().map(|o| o.energized).collect();
        assert_eq!(states, vec![true, false, false]);

        // Window staging keeps using the weighted slices.
        assert_eq!(s.duties(60.0), reference().duties(60.0));
    }

    #[test]
    fn invalid_thresholds_rejected() {
        assert!(reference().with_thresholds(&[25.0, 50.0]).is_err());
        assert!(reference().with_thresholds(&[25.0, 50.0, 120.0]).is_err());
        assert!(reference().with_thresholds(&[50.0, 25.0, 100.0]).is_err());
        assert!(reference().with_thresholds(&[-1.0, 25.0, 100.0]).is_err());
        assert!(reference().with_thresholds(&[f64::NAN, 25.0, 100.0]).is_err());
        assert_eq!(reference().thresholds(), &[25.0, 75.0, 100.0]);
    }

    #[test]
    fn modes_override_staging() {
        let s = reference();
        let window = ControlWindow::new(1000, 0).unwrap();
        let mut outputs: Vec<PhysicalOutput> = (0..3)
            .map(|i| PhysicalOutput::new(OutputId::from_index(i).unwrap(), 1.0, OutputMode::Auto))
            .collect();
        outputs[0].mode = OutputMode::ForcedOff;
        outputs[2].mode = OutputMode::ForcedOn;

        s.stage(50.0, &mut outputs, &window, 100, StagingPolicy::TimeProportional);
        assert!(!outputs[0].energized);
        assert_eq!(outputs[1].duty, 50.0);
        assert!(outputs[1].energized); // 100 ms < 500 ms on-time
        assert!(outputs[2].energized);

        s.stage(50.0, &mut outputs, &window, 600, StagingPolicy::TimeProportional);
        assert!(!outputs[1].energized);
    }

    #[test]
    fn direct_threshold_switches_at_slice_top() {
        let s = reference();
        let window = ControlWindow::new(1000, 0).unwrap();
        let mut outputs: Vec<PhysicalOutput> = (0..3)
            .map(|i| PhysicalOutput::new(OutputId::from_index(i).unwrap(), 1.0, OutputMode::Auto))
            .collect();

        s.stage(24.0, &mut outputs, &window, 0, StagingPolicy::DirectThreshold);
        assert!(outputs.iter().all(|o| !o.energized));

        s.stage(80.0, &mut outputs, &window, 0, StagingPolicy::DirectThreshold);
        let states: Vec<bool> = outputs.iter().map(|o| o.energized).collect();
        assert_eq!(states, vec![true, true, false]);

        s.stage(100.0, &mut outputs, &window, 999, StagingPolicy::DirectThreshold);
        assert!(outputs.iter().all(|o| o.energized));
    }

    proptest! {
        #[test]
        fn duty_never_decreases_as_u_rises(
            weights in prop::collection::vec(0.1_f64..10.0, 1..6),
            a in 0.0_f64..100.0,
            b in 0.0_f64..100.0,
        ) {
            let s = RelayStager::new(&weights, 100.0).unwrap();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let d_lo = s.duties(lo);
            let d_hi = s.duties(hi);
            for (x, y) in d_lo.iter().zip(&d_hi) {
                prop_assert!(x <= y);
            }
        }

        #[test]
        fn higher_outputs_wait_for_lower_to_saturate(
            weights in prop::collection::vec(0.1_f64..10.0, 2..6),
            u in 0.0_f64..=100.0,
        ) {
            let s = RelayStager::new(&weights, 100.0).unwrap();
            let d = s.duties(u);
            for i in 1..d.len() {
                if d[i] > 0.0 {
                    prop_assert_eq!(d[i - 1], 100.0);
                }
            }
            let partial = d.iter().filter(|&&x| x > 0.0 && x < 100.0).count();
            prop_assert!(partial <= 1);
        }
    }
}
