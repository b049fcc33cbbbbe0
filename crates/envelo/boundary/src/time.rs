use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BoundaryError, BoundaryResult, CheckError, CheckResult};

/// Configuration of an operating-hours boundary.
///
/// Days are numbered Monday = 0 through Sunday = 6. When `utc_offset_minutes`
/// is absent the host's local time zone is used.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSpec {
    pub allowed_start: String,
    pub allowed_end: String,
    #[serde(default = "all_days")]
    pub allowed_days: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
}

fn all_days() -> Vec<u8> {
    (0..7).collect()
}

impl TimeSpec {
    pub fn window(allowed_start: impl Into<String>, allowed_end: impl Into<String>) -> Self {
        Self {
            allowed_start: allowed_start.into(),
            allowed_end: allowed_end.into(),
            allowed_days: all_days(),
            utc_offset_minutes: None,
        }
    }
}

/// Compiled time window.
#[derive(Debug)]
pub(crate) struct TimeWindow {
    start: NaiveTime,
    end: NaiveTime,
    days: [bool; 7],
    utc_offset_minutes: Option<i32>,
}

impl TimeWindow {
    pub(crate) fn compile(spec: &TimeSpec, name: &str) -> BoundaryResult<Self> {
        let start = parse_clock(&spec.allowed_start)
            .map_err(|e| BoundaryError::invalid(name, e.to_string()))?;
        let end = parse_clock(&spec.allowed_end)
            .map_err(|e| BoundaryError::invalid(name, e.to_string()))?;

        if spec.allowed_days.is_empty() {
            return Err(BoundaryError::invalid(name, "allowed_days must not be empty"));
        }
        let mut days = [false; 7];
        for &day in &spec.allowed_days {
            if day > 6 {
                return Err(BoundaryError::invalid(
                    name,
                    format!("allowed_days entry {} outside 0..=6", day),
                ));
            }
            days[day as usize] = true;
        }

        if let Some(offset) = spec.utc_offset_minutes {
            if FixedOffset::east_opt(offset * 60).is_none() {
                return Err(BoundaryError::invalid(
                    name,
                    format!("utc_offset_minutes {} out of range", offset),
                ));
            }
        }

        Ok(Self {
            start,
            end,
            days,
            utc_offset_minutes: spec.utc_offset_minutes,
        })
    }

    pub(crate) fn check(&self, now: DateTime<Utc>) -> CheckResult {
        let (time, weekday) = match wall_clock(now, self.utc_offset_minutes) {
            Ok(parts) => parts,
            Err(e) => return e.into(),
        };

        if !self.days[weekday as usize] {
            return CheckResult::Violation(format!("day {} is not an allowed operating day", weekday));
        }
        if !self.contains(time) {
            return CheckResult::Violation(format!(
                "time {} outside allowed window {}-{}",
                time.format("%H:%M:%S"),
                self.start.format("%H:%M:%S"),
                self.end.format("%H:%M:%S")
            ));
        }
        CheckResult::Pass
    }

    /// Inclusive window test at whole-second resolution; `start > end` wraps
    /// over midnight.
    fn contains(&self, time: NaiveTime) -> bool {
        let time = time.with_nanosecond(0).unwrap_or(time);
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_clock(raw: &str) -> Result<NaiveTime, CheckError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| CheckError::InvalidTime(raw.to_string()))
}

/// Time of day and weekday (Monday = 0) for `now` in the given zone.
pub fn wall_clock(
    now: DateTime<Utc>,
    utc_offset_minutes: Option<i32>,
) -> Result<(NaiveTime, u32), CheckError> {
    match utc_offset_minutes {
        Some(minutes) => {
            let offset = FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
                CheckError::InvalidTime(format!("utc offset {} minutes", minutes))
            })?;
            let local = now.with_timezone(&offset);
            Ok((local.time(), local.weekday().num_days_from_monday()))
        }
        None => {
            let local = now.with_timezone(&Local);
            Ok((local.time(), local.weekday().num_days_from_monday()))
        }
    }
}

/// Hour of day in the given zone, used by discovery to learn operating hours.
pub fn hour_and_weekday(now: DateTime<Utc>, utc_offset_minutes: Option<i32>) -> Option<(u32, u32)> {
    wall_clock(now, utc_offset_minutes)
        .ok()
        .map(|(time, weekday)| (time.hour(), weekday))
}
