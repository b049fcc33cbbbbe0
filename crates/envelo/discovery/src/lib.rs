//! # envelo-discovery
//!
//! Learns an operating envelope from observed telemetry.
//!
//! A [`DiscoveryEngine`] classifies each observed parameter map into
//! numeric, geo, time, rate and state samples and accumulates them in
//! bounded buffers. Once enough data has been seen (or on demand) it
//! synthesizes a boundary set:
//!
//! - numeric ranges from fenced, percentile-trimmed samples plus a margin
//! - a circle or buffered convex hull for positions
//! - an operating-hours window padded by an hour each side
//! - per-second and per-minute rate limits above the observed peaks
//! - closed allow-lists for categorical values
//!
//! The result is exported as an [`EnvelopeDefinition`] in boundary document
//! layout.

#![deny(unsafe_code)]

pub mod classify;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod observation;
mod ring;
pub mod synthesis;

pub use classify::{classify, Sample, PAIRED_POSITION_PARAMETER};
pub use config::DiscoveryConfig;
pub use engine::{DiscoveryEngine, DiscoveryState};
pub use envelope::{DiscoveryStats, EnvelopeDefinition};
pub use error::{DiscoveryError, DiscoveryResult};
pub use synthesis::{fence_outliers, TIME_PARAMETER};
