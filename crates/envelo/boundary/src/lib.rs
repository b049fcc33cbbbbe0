//! # envelo-boundary
//!
//! Typed operating-envelope boundaries for the Envelo interlock.
//!
//! A [`Boundary`] is a named rule over one parameter. Five kinds exist:
//!
//! - **Numeric**: inclusive `[min, max]` range with symmetric tolerance
//! - **Geo**: circle (haversine), polygon (even-odd ray casting) or rectangle
//! - **Time**: allowed time-of-day window and weekdays, wrapping midnight
//! - **Rate**: per-second/minute/hour limits over a bounded event ring
//! - **State**: allow-list and/or deny-list, deny wins
//!
//! Evaluation never returns an error: type problems (`NotNumeric`,
//! `InvalidPosition`, `InvalidTime`) are folded into a failed
//! [`CheckResult`]. Construction validates the configuration and refuses to
//! build an inconsistent boundary.
//!
//! Boundaries serialize to a flat JSON object keyed by `type`, and a
//! [`BoundaryDocument`] groups them into one array per kind.

#![deny(unsafe_code)]

pub mod boundary;
pub mod document;
pub mod error;
pub mod geo;
pub mod numeric;
pub mod rate;
pub mod state;
pub mod time;

pub use boundary::{
    Boundary, BoundaryDef, BoundaryKind, BoundaryStatus, EvalTime, RuleSpec, ViolationAction,
};
pub use document::BoundaryDocument;
pub use error::{BoundaryError, BoundaryResult, CheckError, CheckResult};
pub use geo::{haversine_meters, point_in_polygon, GeoPoint, GeoShape, GeoSpec, EARTH_RADIUS_METERS};
pub use numeric::{numeric_value, NumericSpec};
pub use rate::{RateSpec, RATE_RING_CAPACITY};
pub use state::{state_key, StateSpec};
pub use time::{hour_and_weekday, parse_clock, wall_clock, TimeSpec};
