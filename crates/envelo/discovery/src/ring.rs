/// A bounded circular buffer.
///
/// When full, the oldest items are overwritten. Observation accumulators use
/// it so memory stays bounded no matter how long discovery runs.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    buffer: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            buffer: vec![None; cap],
            head: 0,
            len: 0,
        }
    }

    /// Push an item, overwriting the oldest if full.
    pub fn push(&mut self, item: T) {
        self.buffer[self.head] = Some(item);
        self.head = (self.head + 1) % self.buffer.len();
        if self.len < self.buffer.len() {
            self.len += 1;
        }
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let cap = self.buffer.len();
        let start = if self.len < cap { 0 } else { self.head };
        (0..self.len).filter_map(move |i| self.buffer[(start + i) % cap].as_ref())
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.buffer {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let mut rb = RingBuffer::new(4);
        for i in 0..3 {
            rb.push(i);
        }
        assert_eq!(rb.to_vec(), vec![0, 1, 2]);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut rb = RingBuffer::new(3);
        for i in 0..5 {
            rb.push(i);
        }
        assert_eq!(rb.len(), 3);
        assert_eq!(rb.to_vec(), vec![2, 3, 4]);
    }

    #[test]
    fn zero_capacity_clamped() {
        let mut rb = RingBuffer::new(0);
        rb.push("a");
        rb.push("b");
        assert_eq!(rb.capacity(), 1);
        assert_eq!(rb.to_vec(), vec!["b"]);
    }

    #[test]
    fn clear_resets() {
        let mut rb = RingBuffer::new(2);
        rb.push(1);
        rb.clear();
        assert!(rb.is_empty());
        rb.push(7);
        assert_eq!(rb.to_vec(), vec![7]);
    }
}
