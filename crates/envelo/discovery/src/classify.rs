//! Parameter classification for discovery.
//!
//! Names are matched first, values second. Nested objects are flattened into
//! dotted keys and classified again.

use envelo_boundary::GeoPoint;
use serde_json::{Map, Value};

/// Parameter that receives positions assembled from separate lat/lon keys.
pub const PAIRED_POSITION_PARAMETER: &str = "position";

const GEO_NAMES: &[&str] = &[
    "position",
    "location",
    "coordinates",
    "coords",
    "gps",
    "geo",
    "latlon",
    "latlng",
];

const RATE_NAMES: &[&str] = &[
    "rate",
    "frequency",
    "requests",
    "calls",
    "events",
    "commands",
    "actions",
];

const LAT_NAMES: &[&str] = &["lat", "latitude"];
const LON_NAMES: &[&str] = &["lon", "lng", "long", "longitude"];

/// One classified piece of an observed parameter map.
#[derive(Clone, Debug, PartialEq)]
pub enum Sample {
    Numeric(String, f64),
    State(String, Value),
    Geo(String, GeoPoint),
    RateEvent(String),
    Latitude(f64),
    Longitude(f64),
    Skipped(String),
}

/// Classify every key of `params`.
pub fn classify(params: &Map<String, Value>) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(params.len());
    for (key, value) in params {
        classify_into(key, value, true, &mut samples);
    }
    samples
}

fn classify_into(key: &str, value: &Value, top_level: bool, out: &mut Vec<Sample>) {
    let name = key.rsplit('.').next().unwrap_or(key).to_ascii_lowercase();

    let geo_named = GEO_NAMES.iter().any(|g| name.contains(g));
    if (geo_named && (value.is_object() || value.is_array())) || is_position_shaped(value) {
        match GeoPoint::from_value(value) {
            Ok(point) => out.push(Sample::Geo(key.to_string(), point)),
            Err(_) => out.push(Sample::Skipped(key.to_string())),
        }
        return;
    }

    if top_level {
        if let Some(v) = value.as_f64() {
            if matches_family(&name, LAT_NAMES) {
                out.push(Sample::Latitude(v));
                return;
            }
            if matches_family(&name, LON_NAMES) {
                out.push(Sample::Longitude(v));
                return;
            }
        }
    }

    if name
        .split(['_', '-'])
        .any(|token| RATE_NAMES.contains(&token))
    {
        out.push(Sample::RateEvent(key.to_string()));
        return;
    }

    match value {
        Value::Number(n) => match n.as_f64().filter(|v| v.is_finite()) {
            Some(v) => out.push(Sample::Numeric(key.to_string(), v)),
            None => out.push(Sample::Skipped(key.to_string())),
        },
        Value::String(_) | Value::Bool(_) => out.push(Sample::State(key.to_string(), value.clone())),
        Value::Object(map) => {
            for (child, nested) in map {
                classify_into(&format!("{}.{}", key, child), nested, false, out);
            }
        }
        Value::Array(_) | Value::Null => out.push(Sample::Skipped(key.to_string())),
    }
}

/// `lat`, `lat_deg` and `latitude` match; `lateral` does not.
fn matches_family(name: &str, family: &[&str]) -> bool {
    family.iter().any(|stem| {
        name == *stem
            || name
                .strip_prefix(stem)
                .is_some_and(|rest| rest.starts_with(['_', '-']))
    })
}

fn is_position_shaped(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.keys().any(|k| matches_family(&k.to_ascii_lowercase(), LAT_NAMES))
                && map.keys().any(|k| matches_family(&k.to_ascii_lowercase(), LON_NAMES))
        }
        _ => false,
    }
}
