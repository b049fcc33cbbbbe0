use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{BoundaryError, BoundaryResult, CheckResult};

/// Maximum number of event instants retained per rate boundary.
pub const RATE_RING_CAPACITY: usize = 100_000;

/// Configuration of a rate-limit boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_second: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_minute: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_hour: Option<u64>,
}

impl RateSpec {
    pub fn per_second(limit: u64) -> Self {
        Self {
            max_per_second: Some(limit),
            max_per_minute: None,
            max_per_hour: None,
        }
    }

    fn thresholds(&self) -> impl Iterator<Item = (&'static str, Duration, u64)> {
        [
            ("second", Duration::from_secs(1), self.max_per_second),
            ("minute", Duration::from_secs(60), self.max_per_minute),
            ("hour", Duration::from_secs(3600), self.max_per_hour),
        ]
        .into_iter()
        .filter_map(|(label, window, limit)| limit.map(|l| (label, window, l)))
    }

    pub(crate) fn validate(&self, name: &str) -> BoundaryResult<()> {
        if self.thresholds().next().is_none() {
            return Err(BoundaryError::invalid(
                name,
                "at least one of max_per_second, max_per_minute or max_per_hour is required",
            ));
        }
        Ok(())
    }
}

/// Sliding-window event log for one rate boundary.
///
/// Appending and counting happen under a single lock so concurrent callers
/// always observe a consistent count.
#[derive(Debug)]
pub(crate) struct RateWindow {
    events: Mutex<VecDeque<Instant>>,
    capacity: usize,
    horizon: Duration,
}

impl RateWindow {
    pub(crate) fn new(spec: &RateSpec) -> Self {
        let horizon = spec
            .thresholds()
            .map(|(_, window, _)| window)
            .max()
            .unwrap_or(Duration::from_secs(1));
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: RATE_RING_CAPACITY,
            horizon,
        }
    }

    pub(crate) fn check(&self, spec: &RateSpec, parameter: &str, now: Instant) -> CheckResult {
        let mut events = self.events.lock();

        // Keep the ring monotonic even if callers race on their clock reads.
        let stamp = events.back().map_or(now, |last| now.max(*last));
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(stamp);
        while let Some(front) = events.front() {
            if stamp.duration_since(*front) >= self.horizon {
                events.pop_front();
            } else {
                break;
            }
        }

        for (label, window, limit) in spec.thresholds() {
            let count = events
                .iter()
                .rev()
                .take_while(|t| stamp.duration_since(**t) < window)
                .count() as u64;
            if count > limit {
                return CheckResult::Violation(format!(
                    "{} rate {} per {} exceeds limit {}",
                    parameter, count, label, limit
                ));
            }
        }
        CheckResult::Pass
    }

    pub(crate) fn len(&self) -> usize {
        self.events.lock().len()
    }
}
