//! Board capabilities the firmware consumes.

/// One-wire temperature probes.
pub trait TemperatureProbe {
    /// Whether the process probe answered the bus scan.
    fn detect(&mut self) -> bool;

    /// Cabin temperature in °C. A missing probe reads
    /// [`ks_controls::SENSOR_DISCONNECTED_C`] or NaN.
    fn read_process_c(&mut self) -> f64;

    /// Optional second probe outside the cabin.
    fn read_ambient_c(&mut self) -> Option<f64>;
}

pub trait DoorSwitch {
    fn is_open(&mut self) -> bool;
}

/// Binary relay outputs, addressed by zero-based index.
pub trait OutputDriver {
    type Error: core::fmt::Debug;

    fn write(&mut self, index: usize, energized: bool) -> Result<(), Self::Error>;
}
