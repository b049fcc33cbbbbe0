use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{BoundaryError, BoundaryResult, CheckResult};
use crate::geo::GeoSpec;
use crate::numeric::NumericSpec;
use crate::rate::{RateSpec, RateWindow};
use crate::state::{StateSets, StateSpec};
use crate::time::{TimeSpec, TimeWindow};

/// The five boundary kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    Numeric,
    Geo,
    Time,
    Rate,
    State,
}

impl fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryKind::Numeric => write!(f, "numeric"),
            BoundaryKind::Geo => write!(f, "geo"),
            BoundaryKind::Time => write!(f, "time"),
            BoundaryKind::Rate => write!(f, "rate"),
            BoundaryKind::State => write!(f, "state"),
        }
    }
}

/// What happens when a boundary is violated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationAction {
    #[default]
    Block,
}

/// Kind-specific rule configuration, tagged by `type` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleSpec {
    Numeric(NumericSpec),
    Geo(GeoSpec),
    Time(TimeSpec),
    Rate(RateSpec),
    State(StateSpec),
}

impl RuleSpec {
    pub fn kind(&self) -> BoundaryKind {
        match self {
            RuleSpec::Numeric(_) => BoundaryKind::Numeric,
            RuleSpec::Geo(_) => BoundaryKind::Geo,
            RuleSpec::Time(_) => BoundaryKind::Time,
            RuleSpec::Rate(_) => BoundaryKind::Rate,
            RuleSpec::State(_) => BoundaryKind::State,
        }
    }
}

/// Flat, versionless serialized form of a boundary.
///
/// ```json
/// {"type": "numeric", "name": "speed_limit", "parameter": "speed",
///  "min_value": 0.0, "max_value": 30.0, "unit": "m/s", "tolerance": 0.5}
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundaryDef {
    pub name: String,
    pub parameter: String,
    #[serde(default)]
    pub violation_action: ViolationAction,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub rule: RuleSpec,
    /// Provenance attached by discovery; not used for evaluation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<Value>,
}

fn default_true() -> bool {
    true
}

impl BoundaryDef {
    pub fn new(name: impl Into<String>, parameter: impl Into<String>, rule: RuleSpec) -> Self {
        Self {
            name: name.into(),
            parameter: parameter.into(),
            violation_action: ViolationAction::Block,
            enabled: true,
            rule,
            discovery: None,
        }
    }

    pub fn kind(&self) -> BoundaryKind {
        self.rule.kind()
    }

    pub fn with_discovery(mut self, provenance: Value) -> Self {
        self.discovery = Some(provenance);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Clock reading used for one evaluation.
///
/// Wall-clock time drives time-of-day rules; the monotonic instant drives
/// rate windows.
#[derive(Clone, Copy, Debug)]
pub struct EvalTime {
    pub wall: DateTime<Utc>,
    pub mono: Instant,
}

impl EvalTime {
    pub fn now() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }

    pub fn advanced(&self, by: Duration) -> Self {
        Self {
            wall: self.wall + chrono::Duration::from_std(by).unwrap_or_default(),
            mono: self.mono + by,
        }
    }
}

/// Compiled rule: the configuration plus any runtime structures it needs.
#[derive(Debug)]
enum CompiledRule {
    Numeric,
    Geo,
    Time(TimeWindow),
    Rate(RateWindow),
    State(StateSets),
}

/// A named, typed constraint over one parameter.
///
/// Configuration is immutable after construction; only the check counters
/// change. Counters are monotonic and `check_count >= violation_count`.
#[derive(Debug)]
pub struct Boundary {
    def: BoundaryDef,
    compiled: CompiledRule,
    check_count: AtomicU64,
    violation_count: AtomicU64,
}

impl Boundary {
    /// Validate a definition and build the boundary.
    pub fn new(def: BoundaryDef) -> BoundaryResult<Self> {
        if def.name.trim().is_empty() {
            return Err(BoundaryError::invalid(&def.name, "name must not be empty"));
        }
        if def.parameter.trim().is_empty() {
            return Err(BoundaryError::invalid(&def.name, "parameter must not be empty"));
        }

        let compiled = match &def.rule {
            RuleSpec::Numeric(spec) => {
                spec.validate(&def.name)?;
                CompiledRule::Numeric
            }
            RuleSpec::Geo(spec) => {
                spec.validate(&def.name)?;
                CompiledRule::Geo
            }
            RuleSpec::Time(spec) => CompiledRule::Time(TimeWindow::compile(spec, &def.name)?),
            RuleSpec::Rate(spec) => {
                spec.validate(&def.name)?;
                CompiledRule::Rate(RateWindow::new(spec))
            }
            RuleSpec::State(spec) => {
                spec.validate(&def.name)?;
                CompiledRule::State(StateSets::compile(spec))
            }
        };

        Ok(Self {
            def,
            compiled,
            check_count: AtomicU64::new(0),
            violation_count: AtomicU64::new(0),
        })
    }

    /// Build from the flat JSON form.
    pub fn from_value(value: Value) -> BoundaryResult<Self> {
        Self::new(serde_json::from_value(value)?)
    }

    /// Serialize to the flat JSON form (counters are not included).
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.def).unwrap_or(Value::Null)
    }

    pub fn def(&self) -> &BoundaryDef {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn parameter(&self) -> &str {
        &self.def.parameter
    }

    pub fn kind(&self) -> BoundaryKind {
        self.def.kind()
    }

    pub fn is_enabled(&self) -> bool {
        self.def.enabled
    }

    pub fn check_count(&self) -> u64 {
        self.check_count.load(Ordering::Acquire)
    }

    pub fn violation_count(&self) -> u64 {
        self.violation_count.load(Ordering::Acquire)
    }

    /// Check a value against this boundary at the current time.
    pub fn check(&self, value: &Value) -> CheckResult {
        self.check_at(value, &EvalTime::now())
    }

    /// Check a value at an explicit clock reading.
    pub fn check_at(&self, value: &Value, at: &EvalTime) -> CheckResult {
        let parameter = self.def.parameter.as_str();
        let result = match (&self.def.rule, &self.compiled) {
            (RuleSpec::Numeric(spec), CompiledRule::Numeric) => spec.check(parameter, value),
            (RuleSpec::Geo(spec), CompiledRule::Geo) => spec.check(parameter, value),
            (RuleSpec::Time(_), CompiledRule::Time(window)) => window.check(at.wall),
            (RuleSpec::Rate(spec), CompiledRule::Rate(window)) => {
                window.check(spec, parameter, at.mono)
            }
            (RuleSpec::State(_), CompiledRule::State(sets)) => sets.check(parameter, value),
            _ => CheckResult::Violation(format!("boundary '{}' is not compiled", self.def.name)),
        };

        // check_count first so readers never see violations exceed checks
        self.check_count.fetch_add(1, Ordering::AcqRel);
        if let CheckResult::Violation(msg) = &result {
            self.violation_count.fetch_add(1, Ordering::AcqRel);
            debug!(boundary = %self.def.name, kind = %self.kind(), %msg, "boundary violated");
        }
        result
    }

    /// Configuration plus live counters.
    pub fn status(&self) -> BoundaryStatus {
        BoundaryStatus {
            def: self.def.clone(),
            check_count: self.check_count(),
            violation_count: self.violation_count(),
        }
    }
}

/// Serialized boundary with its counters, as reported by status endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoundaryStatus {
    #[serde(flatten)]
    pub def: BoundaryDef,
    pub check_count: u64,
    pub violation_count: u64,
}
