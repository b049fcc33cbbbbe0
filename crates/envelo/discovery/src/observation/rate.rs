use chrono::{DateTime, Duration, Utc};

use crate::ring::RingBuffer;

/// Event timestamps of one rate-like parameter.
#[derive(Clone, Debug)]
pub struct RateObservation {
    events: RingBuffer<DateTime<Utc>>,
    count: u64,
}

impl RateObservation {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RingBuffer::new(capacity),
            count: 0,
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        self.events.push(at);
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Largest number of retained events inside any window of `width`.
    pub fn max_in_window(&self, width: Duration) -> u64 {
        let mut stamps = self.events.to_vec();
        stamps.sort();
        let mut best = 0usize;
        let mut lo = 0usize;
        for hi in 0..stamps.len() {
            while lo < hi && stamps[hi] - stamps[lo] >= width {
                lo += 1;
            }
            best = best.max(hi - lo + 1);
        }
        best as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    #[test]
    fn burst_detected() {
        let mut obs = RateObservation::new(64);
        // One event per second, then a burst of 4 within 300ms.
        for s in 0..5 {
            obs.record(at(s * 1000));
        }
        for ms in [10_000, 10_100, 10_200, 10_300] {
            obs.record(at(ms));
        }
        assert_eq!(obs.count(), 9);
        assert_eq!(obs.max_in_window(Duration::seconds(1)), 4);
        assert_eq!(obs.max_in_window(Duration::seconds(60)), 9);
    }

    #[test]
    fn window_edge_is_exclusive() {
        let mut obs = RateObservation::new(8);
        obs.record(at(0));
        obs.record(at(1000));
        assert_eq!(obs.max_in_window(Duration::seconds(1)), 1);
    }

    #[test]
    fn empty_is_zero() {
        let obs = RateObservation::new(8);
        assert_eq!(obs.max_in_window(Duration::seconds(1)), 0);
    }
}
