//! Per-parameter accumulators fed during discovery.
//!
//! Each accumulator is append-only and bounded. Statistics are computed on a
//! clone, never while the owning map shard is locked.

mod geo;
mod numeric;
mod rate;
mod state;
mod time;

pub use geo::{convex_hull, GeoObservation};
pub use numeric::{percentile, NumericObservation};
pub use rate::RateObservation;
pub use state::{StateObservation, MAX_STATE_VALUES};
pub use time::TimeObservation;
