//! Boundary synthesis from accumulated observations.
//!
//! Every function here is pure: it reads a cloned snapshot and returns the
//! definitions it could justify. Parameters below their sample threshold
//! produce nothing.

use chrono::Duration;
use envelo_boundary::{
    BoundaryDef, GeoPoint, GeoSpec, NumericSpec, RateSpec, RuleSpec, StateSpec, TimeSpec,
};
use serde_json::json;

use crate::config::DiscoveryConfig;
use crate::observation::{
    convex_hull, percentile, GeoObservation, NumericObservation, RateObservation,
    StateObservation, TimeObservation,
};

pub const MIN_NUMERIC_SAMPLES: u64 = 5;
pub const MIN_GEO_SAMPLES: u64 = 10;
pub const MIN_TIME_SAMPLES: u64 = 10;
pub const MIN_RATE_SAMPLES: u64 = 20;
pub const MIN_STATE_SAMPLES: u64 = 5;

/// Below this radius a circle is emitted instead of a hull.
pub const CIRCLE_MAX_RADIUS_METERS: f64 = 500.0;
/// Below this many points a circle is emitted instead of a hull.
pub const POLYGON_MIN_POINTS: usize = 50;

/// Tukey far-out fence multiplier.
const FENCE_K: f64 = 3.0;

/// Parameter name carried by synthesized time boundaries.
pub const TIME_PARAMETER: &str = "time";

/// Cloned accumulators, detached from the live maps.
#[derive(Clone, Debug, Default)]
pub(crate) struct ObservationSnapshot {
    pub numeric: Vec<(String, NumericObservation)>,
    pub geo: Vec<(String, GeoObservation)>,
    pub rate: Vec<(String, RateObservation)>,
    pub state: Vec<(String, StateObservation)>,
    pub time: TimeObservation,
}

pub(crate) fn synthesize(snapshot: &ObservationSnapshot, config: &DiscoveryConfig) -> Vec<BoundaryDef> {
    let mut defs = Vec::new();
    defs.extend(
        snapshot
            .numeric
            .iter()
            .filter_map(|(p, obs)| numeric_boundary(p, obs, config)),
    );
    defs.extend(
        snapshot
            .geo
            .iter()
            .filter_map(|(p, obs)| geo_boundary(p, obs, config)),
    );
    defs.extend(time_boundary(&snapshot.time, config));
    defs.extend(
        snapshot
            .rate
            .iter()
            .filter_map(|(p, obs)| rate_boundary(p, obs, config)),
    );
    defs.extend(snapshot.state.iter().filter_map(|(p, obs)| state_boundary(p, obs)));
    defs
}

/// Drop samples outside the Tukey far-out fences.
///
/// Returns the kept samples (still sorted) and how many were rejected. A
/// zero IQR disables the fence.
pub fn fence_outliers(sorted: &[f64]) -> (Vec<f64>, usize) {
    let (Some(q1), Some(q3)) = (percentile(sorted, 25.0), percentile(sorted, 75.0)) else {
        return (Vec::new(), 0);
    };
    let iqr = q3 - q1;
    if iqr <= f64::EPSILON {
        return (sorted.to_vec(), 0);
    }
    let (lo, hi) = (q1 - FENCE_K * iqr, q3 + FENCE_K * iqr);
    let kept: Vec<f64> = sorted.iter().copied().filter(|v| (lo..=hi).contains(v)).collect();
    let rejected = sorted.len() - kept.len();
    (kept, rejected)
}

pub(crate) fn numeric_boundary(
    parameter: &str,
    obs: &NumericObservation,
    config: &DiscoveryConfig,
) -> Option<BoundaryDef> {
    if obs.count() < MIN_NUMERIC_SAMPLES {
        return None;
    }
    let (kept, rejected) = fence_outliers(&obs.sorted_values());
    let confidence = config.confidence_percentile;
    let low = percentile(&kept, 100.0 - confidence)?;
    let high = percentile(&kept, confidence)?;
    let mean = kept.iter().sum::<f64>() / kept.len() as f64;

    let spread = high - low;
    let margin = if spread > f64::EPSILON {
        spread * config.safety_margin
    } else {
        (mean.abs() * 0.01).max(1.0)
    };

    let mut min = low - margin;
    if obs.min().is_some_and(|m| m >= 0.0) {
        min = min.max(0.0);
    }
    let max = high + margin;

    let spec = NumericSpec {
        min_value: Some(min),
        max_value: Some(max),
        unit: String::new(),
        tolerance: margin * 0.1,
    };
    let provenance = json!({
        "samples": obs.count(),
        "observed_min": obs.min(),
        "observed_max": obs.max(),
        "mean": mean,
        "percentile_low": low,
        "percentile_high": high,
        "outliers_rejected": rejected,
        "margin": margin,
    });
    Some(
        BoundaryDef::new(
            format!("discovered_{}_range", parameter),
            parameter,
            RuleSpec::Numeric(spec),
        )
        .with_discovery(provenance),
    )
}

pub(crate) fn geo_boundary(
    parameter: &str,
    obs: &GeoObservation,
    config: &DiscoveryConfig,
) -> Option<BoundaryDef> {
    if obs.count() < MIN_GEO_SAMPLES {
        return None;
    }
    let centroid = obs.centroid()?;
    let max_radius = obs.max_radius_from(&centroid);
    let buffer = config.geo_buffer_meters;
    let points = obs.points();
    let bounds = obs.bounds();

    let hull = if max_radius < CIRCLE_MAX_RADIUS_METERS || points.len() < POLYGON_MIN_POINTS {
        Vec::new()
    } else {
        convex_hull(&points)
    };

    let (spec, shape) = if hull.len() >= 3 {
        let scale = (max_radius + buffer) / max_radius;
        let vertices = hull
            .iter()
            .map(|v| {
                GeoPoint::new(
                    (centroid.lat + (v.lat - centroid.lat) * scale).clamp(-90.0, 90.0),
                    (centroid.lon + (v.lon - centroid.lon) * scale).clamp(-180.0, 180.0),
                )
            })
            .collect();
        (GeoSpec::polygon(vertices), "polygon")
    } else {
        let radius = (max_radius + buffer).max(1.0);
        (GeoSpec::circle(centroid, radius), "circle")
    };

    let provenance = json!({
        "samples": obs.count(),
        "centroid": centroid.to_value(),
        "max_radius_meters": max_radius,
        "buffer_meters": buffer,
        "hull_vertices": hull.len(),
        "bounds": bounds.map(|(sw, ne)| json!({"south_west": sw.to_value(), "north_east": ne.to_value()})),
    });
    Some(
        BoundaryDef::new(
            format!("discovered_{}_{}", parameter, shape),
            parameter,
            RuleSpec::Geo(spec),
        )
        .with_discovery(provenance),
    )
}

pub(crate) fn time_boundary(obs: &TimeObservation, config: &DiscoveryConfig) -> Option<BoundaryDef> {
    if obs.samples() < MIN_TIME_SAMPLES {
        return None;
    }
    let first = obs.min_hour()?;
    let last = obs.max_hour()?;
    let start = first.saturating_sub(1);
    let end = (last + 1).min(23);

    let spec = TimeSpec {
        allowed_start: format!("{:02}:00:00", start),
        allowed_end: format!("{:02}:59:59", end),
        allowed_days: obs.active_days(),
        utc_offset_minutes: config.utc_offset_minutes,
    };
    let provenance = json!({
        "samples": obs.samples(),
        "first_hour": first,
        "last_hour": last,
        "hour_counts": obs.hour_counts().to_vec(),
    });
    Some(
        BoundaryDef::new("discovered_operating_hours", TIME_PARAMETER, RuleSpec::Time(spec))
            .with_discovery(provenance),
    )
}

pub(crate) fn rate_boundary(
    parameter: &str,
    obs: &RateObservation,
    config: &DiscoveryConfig,
) -> Option<BoundaryDef> {
    if obs.count() < MIN_RATE_SAMPLES {
        return None;
    }
    let peak_second = obs.max_in_window(Duration::seconds(1));
    let peak_minute = obs.max_in_window(Duration::seconds(60));
    let limit = |peak: u64| ((peak as f64) * (1.0 + config.safety_margin)).ceil().max(1.0) as u64;

    let spec = RateSpec {
        max_per_second: Some(limit(peak_second)),
        max_per_minute: Some(limit(peak_minute)),
        max_per_hour: None,
    };
    let provenance = json!({
        "samples": obs.count(),
        "peak_per_second": peak_second,
        "peak_per_minute": peak_minute,
    });
    Some(
        BoundaryDef::new(
            format!("discovered_{}_rate", parameter),
            parameter,
            RuleSpec::Rate(spec),
        )
        .with_discovery(provenance),
    )
}

pub(crate) fn state_boundary(parameter: &str, obs: &StateObservation) -> Option<BoundaryDef> {
    if obs.count() < MIN_STATE_SAMPLES || obs.is_saturated() || obs.unique_values().is_empty() {
        return None;
    }
    let values = obs.unique_values().to_vec();
    let frequencies: Vec<serde_json::Value> = values
        .iter()
        .map(|v| json!({ "value": v, "count": obs.frequency(v) }))
        .collect();
    let provenance = json!({
        "samples": obs.count(),
        "frequencies": frequencies,
    });
    Some(
        BoundaryDef::new(
            format!("discovered_{}_states", parameter),
            parameter,
            RuleSpec::State(StateSpec::allow(values)),
        )
        .with_discovery(provenance),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    fn numeric(values: impl IntoIterator<Item = f64>) -> NumericObservation {
        let mut obs = NumericObservation::new(1024);
        for v in values {
            obs.record(v);
        }
        obs
    }

    fn bounds(def: &BoundaryDef) -> (f64, f64, f64) {
        match &def.rule {
            RuleSpec::Numeric(spec) => (
                spec.min_value.unwrap(),
                spec.max_value.unwrap(),
                spec.tolerance,
            ),
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn numeric_needs_five_samples() {
        let config = DiscoveryConfig::default();
        assert!(numeric_boundary("x", &numeric([1.0, 2.0, 3.0, 4.0]), &config).is_none());
        assert!(numeric_boundary("x", &numeric([1.0, 2.0, 3.0, 4.0, 5.0]), &config).is_some());
    }

    #[test]
    fn numeric_range_has_margin_and_tolerance() {
        let config = DiscoveryConfig {
            confidence_percentile: 100.0,
            ..Default::default()
        };
        let def = numeric_boundary("speed", &numeric((10..=20).map(f64::from)), &config).unwrap();
        let (min, max, tol) = bounds(&def);
        assert!((min - 9.0).abs() < 1e-9);
        assert!((max - 21.0).abs() < 1e-9);
        assert!((tol - 0.1).abs() < 1e-9);
        assert_eq!(def.name, "discovered_speed_range");
        assert!(def.discovery.is_some());
    }

    #[test]
    fn numeric_min_clamped_for_non_negative_data() {
        let config = DiscoveryConfig {
            confidence_percentile: 100.0,
            safety_margin: 1.0,
            ..Default::default()
        };
        let def = numeric_boundary("load", &numeric([0.0, 1.0, 2.0, 3.0, 4.0]), &config).unwrap();
        assert_eq!(bounds(&def).0, 0.0);

        let def = numeric_boundary("temp", &numeric([-1.0, 1.0, 2.0, 3.0, 4.0]), &config).unwrap();
        assert!(bounds(&def).0 < -1.0);
    }

    #[test]
    fn collapsed_range_uses_fallback_margin() {
        let config = DiscoveryConfig::default();
        let def = numeric_boundary("v", &numeric([500.0; 8]), &config).unwrap();
        let (min, max, _) = bounds(&def);
        assert!((min - 495.0).abs() < 1e-9);
        assert!((max - 505.0).abs() < 1e-9);

        let def = numeric_boundary("v", &numeric([0.0; 8]), &config).unwrap();
        let (min, max, _) = bounds(&def);
        assert_eq!(min, 0.0);
        assert!((max - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fence_drops_far_outliers_only() {
        let mut data: Vec<f64> = (0..100).map(f64::from).collect();
        data.push(1000.0);
        let (kept, rejected) = fence_outliers(&data);
        assert_eq!(rejected, 1);
        assert_eq!(kept.len(), 100);

        let flat = vec![5.0; 20];
        assert_eq!(fence_outliers(&flat).1, 0);
    }

    #[test]
    fn small_geo_cluster_becomes_circle() {
        let mut obs = GeoObservation::new(128);
        for i in 0..20 {
            obs.record(GeoPoint::new(51.5 + (i as f64) * 1e-5, -0.12));
        }
        let def = geo_boundary("position", &obs, &DiscoveryConfig::default()).unwrap();
        match def.rule {
            RuleSpec::Geo(spec) => {
                assert!(spec.center.is_some());
                assert!(spec.radius_meters.unwrap() > 50.0);
            }
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn wide_geo_spread_becomes_scaled_hull() {
        let mut obs = GeoObservation::new(1024);
        for i in 0..10 {
            for j in 0..10 {
                obs.record(GeoPoint::new(i as f64 * 0.01, j as f64 * 0.01));
            }
        }
        let def = geo_boundary("position", &obs, &DiscoveryConfig::default()).unwrap();
        let spec = match def.rule {
            RuleSpec::Geo(spec) => spec,
            other => panic!("unexpected rule {:?}", other),
        };
        assert_eq!(spec.points.len(), 4);
        // Scaled outward: the south-west vertex moves below the observed corner.
        assert!(spec.points.iter().any(|p| p.lat < 0.0 && p.lon < 0.0));
    }

    #[test]
    fn time_window_pads_one_hour() {
        let mut obs = TimeObservation::new();
        for hour in 9..=17 {
            obs.record(hour, 1);
            obs.record(hour, 3);
        }
        let def = time_boundary(&obs, &DiscoveryConfig::default()).unwrap();
        match def.rule {
            RuleSpec::Time(spec) => {
                assert_eq!(spec.allowed_start, "08:00:00");
                assert_eq!(spec.allowed_end, "18:59:59");
                assert_eq!(spec.allowed_days, vec![1, 3]);
            }
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn time_window_clamps_at_midnight() {
        let mut obs = TimeObservation::new();
        for _ in 0..5 {
            obs.record(0, 0);
            obs.record(23, 0);
        }
        let def = time_boundary(&obs, &DiscoveryConfig::default()).unwrap();
        match def.rule {
            RuleSpec::Time(spec) => {
                assert_eq!(spec.allowed_start, "00:00:00");
                assert_eq!(spec.allowed_end, "23:59:59");
            }
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn rate_limits_from_peaks() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut obs = RateObservation::new(256);
        for i in 0..30 {
            // An event every 400ms.
            obs.record(base + Duration::milliseconds(i * 400));
        }
        let def = rate_boundary("commands", &obs, &DiscoveryConfig::default()).unwrap();
        match def.rule {
            RuleSpec::Rate(spec) => {
                assert_eq!(spec.max_per_second, Some(4));
                assert!(spec.max_per_minute.unwrap() >= 33);
            }
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn state_allow_list_of_observed_values() {
        let mut obs = StateObservation::new();
        for v in ["idle", "cruise", "idle", "dock", "cruise"] {
            obs.record(&Value::from(v));
        }
        let def = state_boundary("mode", &obs).unwrap();
        match def.rule {
            RuleSpec::State(spec) => {
                assert_eq!(spec.allowed_values.len(), 3);
                assert!(spec.forbidden_values.is_empty());
            }
            other => panic!("unexpected rule {:?}", other),
        }
    }
}
