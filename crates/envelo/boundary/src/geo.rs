//! Geofences: circle, polygon and rectangle containment.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BoundaryError, BoundaryResult, CheckError, CheckResult};

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A WGS84 coordinate in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "lng", alias = "longitude")]
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Parse a position from `{lat, lon}` (with aliases) or `[lat, lon]`.
    pub fn from_value(value: &Value) -> Result<Self, CheckError> {
        let invalid = || CheckError::InvalidPosition(value.to_string());
        let point = match value {
            Value::Object(map) => {
                let lat = ["lat", "latitude"]
                    .iter()
                    .find_map(|k| map.get(*k))
                    .and_then(Value::as_f64);
                let lon = ["lon", "lng", "longitude"]
                    .iter()
                    .find_map(|k| map.get(*k))
                    .and_then(Value::as_f64);
                match (lat, lon) {
                    (Some(lat), Some(lon)) => GeoPoint::new(lat, lon),
                    _ => return Err(invalid()),
                }
            }
            Value::Array(items) if items.len() == 2 => {
                match (items[0].as_f64(), items[1].as_f64()) {
                    (Some(lat), Some(lon)) => GeoPoint::new(lat, lon),
                    _ => return Err(invalid()),
                }
            }
            _ => return Err(invalid()),
        };
        if point.is_valid() {
            Ok(point)
        } else {
            Err(invalid())
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "lat": self.lat, "lon": self.lon })
    }
}

/// Great-circle distance in meters (haversine formula).
pub fn haversine_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Even-odd ray casting with longitude as x and latitude as y.
pub fn point_in_polygon(point: &GeoPoint, vertices: &[GeoPoint]) -> bool {
    let (x, y) = (point.lon, point.lat);
    let mut inside = false;
    let mut j = vertices.len().wrapping_sub(1);
    for i in 0..vertices.len() {
        let (xi, yi) = (vertices[i].lon, vertices[i].lat);
        let (xj, yj) = (vertices[j].lon, vertices[j].lat);
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Shape of a geofence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoShape {
    Circle,
    Polygon,
    Rectangle,
}

/// Configuration of a geofence boundary.
///
/// `points` holds polygon vertices or the two opposite rectangle corners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoSpec {
    pub boundary_type: GeoShape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_meters: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<GeoPoint>,
}

impl GeoSpec {
    pub fn circle(center: GeoPoint, radius_meters: f64) -> Self {
        Self {
            boundary_type: GeoShape::Circle,
            center: Some(center),
            radius_meters: Some(radius_meters),
            points: Vec::new(),
        }
    }

    pub fn polygon(points: Vec<GeoPoint>) -> Self {
        Self {
            boundary_type: GeoShape::Polygon,
            center: None,
            radius_meters: None,
            points,
        }
    }

    pub fn rectangle(corner_a: GeoPoint, corner_b: GeoPoint) -> Self {
        Self {
            boundary_type: GeoShape::Rectangle,
            center: None,
            radius_meters: None,
            points: vec![corner_a, corner_b],
        }
    }

    pub(crate) fn validate(&self, name: &str) -> BoundaryResult<()> {
        if let Some(bad) = self.points.iter().find(|p| !p.is_valid()) {
            return Err(BoundaryError::invalid(
                name,
                format!("coordinate out of range: ({}, {})", bad.lat, bad.lon),
            ));
        }
        match self.boundary_type {
            GeoShape::Circle => {
                match self.center {
                    Some(c) if c.is_valid() => {}
                    Some(_) => return Err(BoundaryError::invalid(name, "circle center out of range")),
                    None => return Err(BoundaryError::invalid(name, "circle requires a center")),
                }
                match self.radius_meters {
                    Some(r) if r.is_finite() && r > 0.0 => Ok(()),
                    _ => Err(BoundaryError::invalid(name, "circle requires radius_meters > 0")),
                }
            }
            GeoShape::Polygon if self.points.len() < 3 => Err(BoundaryError::invalid(
                name,
                format!("polygon requires at least 3 points, got {}", self.points.len()),
            )),
            GeoShape::Rectangle if self.points.len() != 2 => Err(BoundaryError::invalid(
                name,
                format!("rectangle requires exactly 2 corners, got {}", self.points.len()),
            )),
            _ => Ok(()),
        }
    }

    pub(crate) fn check(&self, parameter: &str, value: &Value) -> CheckResult {
        let point = match GeoPoint::from_value(value) {
            Ok(p) => p,
            Err(e) => return e.into(),
        };

        match self.boundary_type {
            GeoShape::Circle => {
                let (Some(center), Some(radius)) = (self.center, self.radius_meters) else {
                    return CheckResult::Violation("circle geofence is incomplete".into());
                };
                let distance = haversine_meters(&center, &point);
                if distance > radius {
                    CheckResult::Violation(format!(
                        "{} ({:.6}, {:.6}) is {:.1}m from center, outside radius {:.1}m",
                        parameter, point.lat, point.lon, distance, radius
                    ))
                } else {
                    CheckResult::Pass
                }
            }
            GeoShape::Polygon => {
                if point_in_polygon(&point, &self.points) {
                    CheckResult::Pass
                } else {
                    CheckResult::Violation(format!(
                        "{} ({:.6}, {:.6}) is outside the polygon geofence",
                        parameter, point.lat, point.lon
                    ))
                }
            }
            GeoShape::Rectangle => {
                let [a, b] = match self.points.as_slice() {
                    [a, b] => [*a, *b],
                    _ => return CheckResult::Violation("rectangle geofence is incomplete".into()),
                };
                let lat_ok = point.lat >= a.lat.min(b.lat) && point.lat <= a.lat.max(b.lat);
                let lon_ok = point.lon >= a.lon.min(b.lon) && point.lon <= a.lon.max(b.lon);
                if lat_ok && lon_ok {
                    CheckResult::Pass
                } else {
                    CheckResult::Violation(format!(
                        "{} ({:.6}, {:.6}) is outside the rectangle geofence",
                        parameter, point.lat, point.lon
                    ))
                }
            }
        }
    }
}
