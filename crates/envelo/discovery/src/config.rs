use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, DiscoveryResult};

/// Tunables for envelope discovery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Observations required before auto-transition.
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
    /// Wall-clock seconds required before auto-transition.
    #[serde(default = "default_discovery_duration_secs")]
    pub discovery_duration_secs: u64,
    /// Upper percentile used for numeric ranges (lower is `100 - p`).
    #[serde(default = "default_confidence_percentile")]
    pub confidence_percentile: f64,
    /// Fractional margin added around every synthesized range.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    /// Meters added to every synthesized geofence.
    #[serde(default = "default_geo_buffer_meters")]
    pub geo_buffer_meters: f64,
    #[serde(default = "default_true")]
    pub auto_transition: bool,
    /// Time zone for hour/day bucketing; host local time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
    #[serde(default = "default_max_samples_per_parameter")]
    pub max_samples_per_parameter: usize,
}

fn default_min_samples() -> u64 {
    1000
}

fn default_discovery_duration_secs() -> u64 {
    3600
}

fn default_confidence_percentile() -> f64 {
    99.0
}

fn default_safety_margin() -> f64 {
    0.10
}

fn default_geo_buffer_meters() -> f64 {
    50.0
}

fn default_true() -> bool {
    true
}

fn default_max_samples_per_parameter() -> usize {
    100_000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            discovery_duration_secs: default_discovery_duration_secs(),
            confidence_percentile: default_confidence_percentile(),
            safety_margin: default_safety_margin(),
            geo_buffer_meters: default_geo_buffer_meters(),
            auto_transition: true,
            utc_offset_minutes: None,
            max_samples_per_parameter: default_max_samples_per_parameter(),
        }
    }
}

impl DiscoveryConfig {
    pub fn discovery_duration(&self) -> Duration {
        Duration::from_secs(self.discovery_duration_secs)
    }

    pub fn validate(&self) -> DiscoveryResult<()> {
        if !(50.0..=100.0).contains(&self.confidence_percentile) {
            return Err(DiscoveryError::InvalidConfig(format!(
                "confidence_percentile {} must be within 50..=100",
                self.confidence_percentile
            )));
        }
        if !self.safety_margin.is_finite() || self.safety_margin < 0.0 {
            return Err(DiscoveryError::InvalidConfig(
                "safety_margin must be >= 0".into(),
            ));
        }
        if !self.geo_buffer_meters.is_finite() || self.geo_buffer_meters < 0.0 {
            return Err(DiscoveryError::InvalidConfig(
                "geo_buffer_meters must be >= 0".into(),
            ));
        }
        if let Some(offset) = self.utc_offset_minutes {
            if offset.abs() >= 24 * 60 {
                return Err(DiscoveryError::InvalidConfig(format!(
                    "utc_offset_minutes {} out of range",
                    offset
                )));
            }
        }
        if self.max_samples_per_parameter == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "max_samples_per_parameter must be > 0".into(),
            ));
        }
        Ok(())
    }
}
