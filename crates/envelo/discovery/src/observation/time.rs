/// Hour-of-day and weekday histogram of discovery activity.
#[derive(Clone, Debug, Default)]
pub struct TimeObservation {
    hours: [u64; 24],
    weekdays: [u64; 7],
    samples: u64,
}

impl TimeObservation {
    pub fn new() -> Self {
        Self::default()
    }

    /// `hour` in `0..24`, `weekday` Monday = 0.
    pub fn record(&mut self, hour: u32, weekday: u32) {
        if let (Some(h), Some(d)) = (
            self.hours.get_mut(hour as usize),
            self.weekdays.get_mut(weekday as usize),
        ) {
            *h += 1;
            *d += 1;
            self.samples += 1;
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn min_hour(&self) -> Option<u32> {
        self.hours.iter().position(|&c| c > 0).map(|h| h as u32)
    }

    pub fn max_hour(&self) -> Option<u32> {
        self.hours.iter().rposition(|&c| c > 0).map(|h| h as u32)
    }

    pub fn hour_counts(&self) -> &[u64; 24] {
        &self.hours
    }

    pub fn active_days(&self) -> Vec<u8> {
        (0u8..7).filter(|&d| self.weekdays[d as usize] > 0).collect()
    }
}
