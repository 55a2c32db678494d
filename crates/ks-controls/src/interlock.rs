//! Door and sensor-fault interlock.
//!
//! The interlock state is re-derived from fresh readings on every tick and
//! applied to every output on every tick, not just on transitions. Edges
//! are reported once each so telemetry does not repeat itself.

use tracing::warn;

use crate::output::PhysicalOutput;

/// Reading a one-wire probe returns when it is not on the bus.
pub const SENSOR_DISCONNECTED_C: f64 = -127.0;

/// True when `pv` cannot be a real cabin temperature.
pub fn is_sensor_fault(pv: f64) -> bool {
    !pv.is_finite() || pv == SENSOR_DISCONNECTED_C
}

/// A change in interlock inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterlockEdge {
    DoorOpened,
    DoorClosed,
    SensorFault,
    SensorRecovered,
}

/// Door-open and sensor-fault flags with edge detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafetyInterlock {
    door_open: bool,
    sensor_fault: bool,
}

impl SafetyInterlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn door_open(&self) -> bool {
        self.door_open
    }

    pub fn sensor_fault(&self) -> bool {
        self.sensor_fault
    }

    /// Either condition holds; outputs must be off.
    pub fn is_tripped(&self) -> bool {
        self.door_open || self.sensor_fault
    }

    /// Take this tick's readings, returning the edges they caused.
    pub fn update(&mut self, door_open: bool, pv: f64) -> impl Iterator<Item = InterlockEdge> + use<> {
        let fault = is_sensor_fault(pv);

        let door_edge = (door_open != self.door_open).then(|| {
            if door_open {
                warn!("door opened, heaters interlocked");
                InterlockEdge::DoorOpened
            } else {
                InterlockEdge::DoorClosed
            }
        });
        let sensor_edge = (fault != self.sensor_fault).then(|| {
            if fault {
                warn!(pv, "temperature probe fault, heaters off");
                InterlockEdge::SensorFault
            } else {
                InterlockEdge::SensorRecovered
            }
        });

        self.door_open = door_open;
        self.sensor_fault = fault;
        door_edge.into_iter().chain(sensor_edge)
    }

    /// Force every output off if tripped. Returns whether it did.
    pub fn apply(&self, outputs: &mut [PhysicalOutput]) -> bool {
        if self.is_tripped() {
            outputs.iter_mut().for_each(PhysicalOutput::de_energize);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputMode;
    use ks_core::OutputId;

    fn forced_on(n: usize) -> Vec<PhysicalOutput> {
        (0..n)
            .map(|i| {
                let mut o = PhysicalOutput::new(OutputId::from_index(i).unwrap(), 1.0, OutputMode::ForcedOn);
                o.energized = true;
                o
            })
            .collect()
    }

    #[test]
    fn sentinel_and_nan_are_faults() {
        assert!(is_sensor_fault(SENSOR_DISCONNECTED_C));
        assert!(is_sensor_fault(f64::NAN));
        assert!(!is_sensor_fault(-20.0));
        assert!(!is_sensor_fault(85.0));
    }

    #[test]
    fn edges_reported_once() {
        let mut lock = SafetyInterlock::new();
        let edges: Vec<_> = lock.update(true, 70.0).collect();
        assert_eq!(edges, vec![InterlockEdge::DoorOpened]);
        assert_eq!(lock.update(true, 70.0).count(), 0);

        let edges: Vec<_> = lock.update(false, SENSOR_DISCONNECTED_C).collect();
        assert_eq!(edges, vec![InterlockEdge::DoorClosed, InterlockEdge::SensorFault]);
        assert_eq!(lock.update(false, SENSOR_DISCONNECTED_C).count(), 0);

        let edges: Vec<_> = lock.update(false, 71.0).collect();
        assert_eq!(edges, vec![InterlockEdge::SensorRecovered]);
    }

    #[test]
    fn tripped_interlock_beats_forced_on() {
        let mut lock = SafetyInterlock::new();
        let mut outputs = forced_on(3);
        let _ = lock.update(true, 70.0).count();
        assert!(lock.apply(&mut outputs));
        assert!(outputs.iter().all(|o| !o.energized));
    }

    #[test]
    fn override_reapplied_without_new_edge() {
        let mut lock = SafetyInterlock::new();
        let _ = lock.update(false, f64::NAN).count();
        // A later tick with no edge must still clamp outputs.
        assert_eq!(lock.update(false, f64::NAN).count(), 0);
        let mut outputs = forced_on(2);
        assert!(lock.apply(&mut outputs));
        assert!(outputs.iter().all(|o| !o.energized));
    }
}
