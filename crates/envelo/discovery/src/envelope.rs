use chrono::{DateTime, Utc};
use envelo_boundary::BoundaryDocument;
use serde::{Deserialize, Serialize};

use crate::engine::DiscoveryState;

/// Exportable result of a discovery run.
///
/// Flattens to the boundary document layout so it can be uploaded to the
/// authority as-is, with run metadata alongside.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeDefinition {
    pub generated_at: DateTime<Utc>,
    pub discovery_started_at: DateTime<Utc>,
    pub discovery_duration_secs: f64,
    pub total_observations: u64,
    pub confidence_percentile: f64,
    pub safety_margin: f64,
    #[serde(flatten)]
    pub boundaries: BoundaryDocument,
}

/// Point-in-time view of a discovery engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    pub state: DiscoveryState,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub total_observations: u64,
    pub skipped_samples: u64,
    pub numeric_parameters: usize,
    pub geo_parameters: usize,
    pub rate_parameters: usize,
    pub state_parameters: usize,
    pub time_samples: u64,
    /// Envelopes published since the last reset.
    pub calibrations: u64,
    pub boundaries_generated: usize,
}
