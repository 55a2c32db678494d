//! Cabin thermal model.
//!
//! First-order lag towards `ambient + rise * power`, where `power` is the
//! energized fraction of total heater power:
//! `dT/dt = (ambient + rise * power - T) / tau`.

use ks_core::{Temperature, as_celsius, celsius};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalPlant {
    /// Time constant in seconds.
    pub tau_s: f64,
    /// Steady-state rise above ambient with every heater on.
    pub full_power_rise_c: f64,
    pub ambient: Temperature,
}

impl Default for ThermalPlant {
    fn default() -> Self {
        Self {
            tau_s: 1_800.0,
            full_power_rise_c: 110.0,
            ambient: celsius(20.0),
        }
    }
}

impl ThermalPlant {
    /// Energized share of total power for the given weights.
    pub fn power_fraction(weights: &[f64], energized: &[bool]) -> f64 {
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        let on: f64 = weights
            .iter()
            .zip(energized)
            .filter(|(_, on)| **on)
            .map(|(w, _)| w)
            .sum();
        (on / total).clamp(0.0, 1.0)
    }

    /// Advance the cabin temperature by `dt_s` (explicit Euler).
    pub fn step(&self, cabin: Temperature, dt_s: f64, power: f64) -> Temperature {
        let t = as_celsius(cabin);
        let target = as_celsius(self.ambient) + self.full_power_rise_c * power.clamp(0.0, 1.0);
        celsius(t + (target - t) / self.tau_s * dt_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heats_towards_full_power_steady_state() {
        let plant = ThermalPlant::default();
        let mut t = plant.ambient;
        for _ in 0..20_000 {
            t = plant.step(t, 1.0, 1.0);
        }
        assert!((as_celsius(t) - 130.0).abs() < 0.5);
    }

    #[test]
    fn cools_to_ambient_without_power() {
        let plant = ThermalPlant::default();
        let t = plant.step(celsius(80.0), 10.0, 0.0);
        assert!(as_celsius(t) < 80.0);
        assert!(as_celsius(t) > 20.0);
    }

    #[test]
    fn power_fraction_uses_weights() {
        let f = ThermalPlant::power_fraction(&[1.0, 2.0, 1.0], &[true, false, true]);
        assert!((f - 0.5).abs() < 1e-12);
    }
}
