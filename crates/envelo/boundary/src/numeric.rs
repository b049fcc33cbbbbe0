use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BoundaryError, BoundaryResult, CheckError, CheckResult};

/// Configuration of a numeric range boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumericSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub unit: String,
    /// Symmetric slack applied to both ends at comparison time
    #[serde(default)]
    pub tolerance: f64,
}

impl NumericSpec {
    pub fn range(min_value: Option<f64>, max_value: Option<f64>) -> Self {
        Self {
            min_value,
            max_value,
            unit: String::new(),
            tolerance: 0.0,
        }
    }

    pub(crate) fn validate(&self, name: &str) -> BoundaryResult<()> {
        if self.min_value.is_none() && self.max_value.is_none() {
            return Err(BoundaryError::invalid(
                name,
                "at least one of min_value or max_value is required",
            ));
        }
        for bound in [self.min_value, self.max_value].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(BoundaryError::invalid(name, "bounds must be finite"));
            }
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err(BoundaryError::invalid(
                    name,
                    format!("min_value {} greater than max_value {}", min, max),
                ));
            }
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(BoundaryError::invalid(name, "tolerance must be >= 0"));
        }
        Ok(())
    }

    /// The tolerance is applied here, never to the stored bounds.
    pub(crate) fn check(&self, parameter: &str, value: &Value) -> CheckResult {
        let v = match numeric_value(value) {
            Ok(v) => v,
            Err(e) => return e.into(),
        };

        if let Some(min) = self.min_value {
            let floor = min - self.tolerance;
            if v < floor {
                return CheckResult::Violation(format!(
                    "{}={}{} below minimum {}{} (by {})",
                    parameter,
                    v,
                    self.unit,
                    min,
                    self.unit,
                    floor - v
                ));
            }
        }
        if let Some(max) = self.max_value {
            let ceiling = max + self.tolerance;
            if v > ceiling {
                return CheckResult::Violation(format!(
                    "{}={}{} above maximum {}{} (by {})",
                    parameter,
                    v,
                    self.unit,
                    max,
                    self.unit,
                    v - ceiling
                ));
            }
        }
        CheckResult::Pass
    }
}

/// Convert a parameter value to a finite number.
///
/// Accepts JSON numbers and numeric strings. NaN and infinities are rejected
/// so they can never slip past a range comparison.
pub fn numeric_value(value: &Value) -> Result<f64, CheckError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(CheckError::NotNumeric(value.to_string())),
    }
}
