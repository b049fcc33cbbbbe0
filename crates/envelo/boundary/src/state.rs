use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BoundaryError, BoundaryResult, CheckResult};

/// Configuration of an allowed/forbidden state boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_values: Vec<Value>,
}

impl StateSpec {
    pub fn allow<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            allowed_values: values.into_iter().map(Into::into).collect(),
            forbidden_values: Vec::new(),
        }
    }

    pub fn forbid<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            allowed_values: Vec::new(),
            forbidden_values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub(crate) fn validate(&self, name: &str) -> BoundaryResult<()> {
        if self.allowed_values.is_empty() && self.forbidden_values.is_empty() {
            return Err(BoundaryError::invalid(
                name,
                "allowed_values or forbidden_values must be non-empty",
            ));
        }
        Ok(())
    }
}

/// Canonical lookup key for a state value: its compact JSON text, so the
/// string `"3"` and the number `3` stay distinct.
pub fn state_key(value: &Value) -> String {
    value.to_string()
}

/// Compiled allow/deny sets.
#[derive(Debug)]
pub(crate) struct StateSets {
    allowed: HashSet<String>,
    forbidden: HashSet<String>,
}

impl StateSets {
    pub(crate) fn compile(spec: &StateSpec) -> Self {
        Self {
            allowed: spec.allowed_values.iter().map(state_key).collect(),
            forbidden: spec.forbidden_values.iter().map(state_key).collect(),
        }
    }

    /// Forbidden values take precedence over the allow-list.
    pub(crate) fn check(&self, parameter: &str, value: &Value) -> CheckResult {
        let key = state_key(value);
        if self.forbidden.contains(&key) {
            return CheckResult::Violation(format!("{} {} is forbidden", parameter, key));
        }
        if !self.allowed.is_empty() && !self.allowed.contains(&key) {
            return CheckResult::Violation(format!("{} {} is not an allowed value", parameter, key));
        }
        CheckResult::Pass
    }
}
