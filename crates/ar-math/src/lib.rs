//! Anomaly results math utilities.

pub mod math;

pub use math::change::*;
pub use math::quantile_table::*;
pub use math::score::*;
