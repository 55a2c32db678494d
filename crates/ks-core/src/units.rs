// ks-core/src/units.rs

use uom::si::f64::{
    ElectricPotential as UomElectricPotential,
    ThermodynamicTemperature as UomThermodynamicTemperature,
};

// Public canonical unit types (SI, f64)
pub type Voltage = UomElectricPotential;
pub type Temperature = UomThermodynamicTemperature;

#[inline]
pub fn celsius(v: f64) -> Temperature {
    use uom::si::thermodynamic_temperature::degree_celsius;
    Temperature::new::<degree_celsius>(v)
}

#[inline]
pub fn as_celsius(t: Temperature) -> f64 {
    use uom::si::thermodynamic_temperature::degree_celsius;
    t.get::<degree_celsius>()
}

#[inline]
pub fn volts(v: f64) -> Voltage {
    use uom::si::electric_potential::volt;
    Voltage::new::<volt>(v)
}

#[inline]
pub fn as_volts(v: Voltage) -> f64 {
    use uom::si::electric_potential::volt;
    v.get::<volt>()
}
