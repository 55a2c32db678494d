//! ks-core: shared foundation for the kiuas controller.
//!
//! Contains:
//! - units (uom SI types + constructors for the values we report)
//! - numeric (Real + float checks)
//! - ids (output and analog channel identifiers)
//! - error (shared error types)
//! - timing (per-operation cost accounting)

pub mod error;
pub mod ids;
pub mod numeric;
pub mod timing;
pub mod units;

pub use error::{KsError, KsResult};
pub use ids::*;
pub use numeric::*;
pub use units::*;
