use std::collections::HashMap;

use envelo_boundary::state_key;
use serde_json::Value;

/// Distinct values beyond which a parameter is treated as free-form, not a
/// state.
pub const MAX_STATE_VALUES: usize = 256;

/// Observed values of one categorical parameter.
#[derive(Clone, Debug, Default)]
pub struct StateObservation {
    counts: HashMap<String, u64>,
    /// First-seen order, one representative per distinct key.
    values: Vec<Value>,
    count: u64,
    saturated: bool,
}

impl StateObservation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: &Value) {
        self.count += 1;
        if self.saturated {
            return;
        }
        let key = state_key(value);
        if let Some(seen) = self.counts.get_mut(&key) {
            *seen += 1;
            return;
        }
        if self.values.len() >= MAX_STATE_VALUES {
            self.saturated = true;
            self.counts.clear();
            self.values.clear();
            return;
        }
        self.counts.insert(key, 1);
        self.values.push(value.clone());
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// True once more than [`MAX_STATE_VALUES`] distinct values were seen.
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    pub fn unique_values(&self) -> &[Value] {
        &self.values
    }

    pub fn frequency(&self, value: &Value) -> u64 {
        self.counts.get(&state_key(value)).copied().unwrap_or(0)
    }
}
