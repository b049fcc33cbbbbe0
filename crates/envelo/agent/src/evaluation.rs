//! Verdicts produced by the agent.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use envelo_boundary::{Boundary, BoundaryKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const LAT_KEYS: &[&str] = &["lat", "latitude"];
const LON_KEYS: &[&str] = &["lon", "lng", "longitude", "long"];

/// Outcome of one boundary for one action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundaryEvaluation {
    pub boundary: String,
    pub parameter: String,
    pub kind: BoundaryKind,
    pub passed: bool,
    /// Parameter absent or boundary disabled; counts as a pass.
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Aggregate verdict for one action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub action_id: String,
    pub timestamp: DateTime<Utc>,
    pub allowed: bool,
    pub violations: Vec<String>,
    pub boundary_evaluations: Vec<BoundaryEvaluation>,
    pub execution_time_us: u64,
}

impl Evaluation {
    pub fn blocked(&self) -> bool {
        !self.allowed
    }

    pub fn failed_boundaries(&self) -> impl Iterator<Item = &BoundaryEvaluation> {
        self.boundary_evaluations.iter().filter(|e| !e.passed)
    }
}

/// Locate the value a boundary should check.
///
/// Lookup order: the exact key, then a dotted path into nested objects. Geo
/// boundaries additionally accept separate lat/lon scalars. Time boundaries
/// read the clock, so they always get a value.
pub(crate) fn resolve_parameter<'a>(
    params: &'a Map<String, Value>,
    boundary: &Boundary,
) -> Option<Cow<'a, Value>> {
    let parameter = boundary.parameter();
    if let Some(v) = params.get(parameter) {
        return Some(Cow::Borrowed(v));
    }
    if let Some(v) = dotted_lookup(params, parameter) {
        return Some(Cow::Borrowed(v));
    }
    match boundary.kind() {
        BoundaryKind::Time => Some(Cow::Owned(Value::Null)),
        BoundaryKind::Geo => assemble_position(params).map(Cow::Owned),
        _ => None,
    }
}

fn dotted_lookup<'a>(params: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = params.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn assemble_position(params: &Map<String, Value>) -> Option<Value> {
    let find = |keys: &[&str]| keys.iter().find_map(|k| params.get(*k).and_then(Value::as_f64));
    let lat = find(LAT_KEYS)?;
    let lon = find(LON_KEYS)?;
    Some(serde_json::json!({ "lat": lat, "lon": lon }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use envelo_boundary::{BoundaryDef, GeoPoint, GeoSpec, NumericSpec, RuleSpec, TimeSpec};
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn numeric(parameter: &str) -> Boundary {
        Boundary::new(BoundaryDef::new(
            "n",
            parameter,
            RuleSpec::Numeric(NumericSpec::range(Some(0.0), Some(10.0))),
        ))
        .unwrap()
    }

    #[test]
    fn exact_and_dotted() {
        let p = params(json!({"speed": 3, "motor": {"temp": 40}}));
        assert_eq!(resolve_parameter(&p, &numeric("speed")).unwrap().as_ref(), &json!(3));
        assert_eq!(
            resolve_parameter(&p, &numeric("motor.temp")).unwrap().as_ref(),
            &json!(40)
        );
        assert!(resolve_parameter(&p, &numeric("motor.rpm")).is_none());
        assert!(resolve_parameter(&p, &numeric("altitude")).is_none());
    }

    #[test]
    fn geo_from_scalars() {
        let fence = Boundary::new(BoundaryDef::new(
            "fence",
            "position",
            RuleSpec::Geo(GeoSpec::circle(GeoPoint::new(0.0, 0.0), 1000.0)),
        ))
        .unwrap();
        let p = params(json!({"latitude": 0.001, "lng": 0.0}));
        let v = resolve_parameter(&p, &fence).unwrap();
        assert_eq!(v.as_ref(), &json!({"lat": 0.001, "lon": 0.0}));

        let only_lat = params(json!({"lat": 0.001}));
        assert!(resolve_parameter(&only_lat, &fence).is_none());
    }

    #[test]
    fn time_always_resolves() {
        let hours = Boundary::new(BoundaryDef::new(
            "hours",
            "time",
            RuleSpec::Time(TimeSpec::window("00:00", "23:59:59")),
        ))
        .unwrap();
        assert!(resolve_parameter(&Map::new(), &hours).is_some());
    }
}
