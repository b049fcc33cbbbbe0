use crate::ring::RingBuffer;

/// Samples of one numeric parameter.
#[derive(Clone, Debug)]
pub struct NumericObservation {
    values: RingBuffer<f64>,
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
}

impl NumericObservation {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: RingBuffer::new(capacity),
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }

    pub fn record(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.values.push(value);
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }

    /// Total samples recorded, including ones since evicted from the ring.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Running minimum over every sample ever recorded.
    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Retained samples in ascending order.
    pub fn sorted_values(&self) -> Vec<f64> {
        let mut sorted = self.values.to_vec();
        sorted.sort_by(f64::total_cmp);
        sorted
    }

    pub fn percentile(&self, p: f64) -> Option<f64> {
        percentile(&self.sorted_values(), p)
    }
}

/// Linear-interpolated percentile of an ascending slice, `p` in `0..=100`.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (p.clamp(0.0, 100.0) / 100.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
