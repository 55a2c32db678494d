use crate::KsError;

/// Floating point type used throughout the controller.
pub type Real = f64;

pub fn ensure_finite(v: Real, what: &'static str) -> Result<Real, KsError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(KsError::NonFinite { what, value: v })
    }
}

/// Clamp to `[min, max]`, reporting whether the input had to be moved.
///
/// NaN is treated as out of range and pinned to `min`.
pub fn clamp_reported(v: Real, min: Real, max: Real) -> (Real, bool) {
    if v.is_nan() {
        return (min, true);
    }
    let clamped = v.clamp(min, max);
    (clamped, clamped != v)
}
