//! Fixed-capacity running mean.
//!
//! Used to estimate how a remote clock relates to ours: each incoming packet
//! contributes `local_time - send_time`, and the mean of recent values is the
//! baseline a single packet's delta is compared against.

/// Reference window for clock-delta averaging.
pub const DEFAULT_CAPACITY: usize = 100;

/// Ring buffer of the most recent `capacity` samples.
#[derive(Debug, Clone)]
pub struct RollingAverage {
    samples: Vec<f32>,
    capacity: usize,
    /// Slot the next sample overwrites once the buffer is full.
    cursor: usize,
}

impl RollingAverage {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    /// Appends a sample, evicting the oldest once the window is full.
    pub fn add_value(&mut self, value: f32) {
        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else {
            self.samples[self.cursor] = value;
            self.cursor = (self.cursor + 1) % self.capacity;
        }
    }

    /// Mean of the held samples, or 0 when empty.
    /// Summed in f64 from the held samples on every call.
    pub fn average_value(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|&v| f64::from(v)).sum();
        (sum / self.samples.len() as f64) as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.cursor = 0;
    }
}

impl Default for RollingAverage {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_average_is_zero() {
        let avg = RollingAverage::new(4);
        assert!(avg.is_empty());
        assert_eq!(avg.average_value(), 0.0);
    }

    #[test]
    fn warm_up_uses_only_held_values() {
        let mut avg = RollingAverage::new(100);
        for v in [1.0, 2.0, 3.0, 6.0] {
            avg.add_value(v);
        }
        assert_eq!(avg.len(), 4);
        assert_eq!(avg.average_value(), 3.0);
    }

    #[test]
    fn oldest_value_is_evicted_past_capacity() {
        let mut avg = RollingAverage::new(3);
        for v in [100.0, 1.0, 2.0, 3.0] {
            avg.add_value(v);
        }
        assert_eq!(avg.len(), 3);
        assert_eq!(avg.average_value(), 2.0);

        avg.add_value(7.0);
        assert_eq!(avg.average_value(), 4.0);
    }

    #[test]
    fn no_reallocation_after_warm_up() {
        let mut avg = RollingAverage::new(8);
        for i in 0..8 {
            avg.add_value(i as f32);
        }
        let ptr = avg.samples.as_ptr();
        for i in 0..64 {
            avg.add_value(i as f32);
        }
        assert_eq!(ptr, avg.samples.as_ptr());
        assert_eq!(avg.len(), 8);
    }

    #[test]
    fn long_run_matches_direct_mean() {
        // Three hours of game clock, one packet every 0.05 s.
        let mut avg = RollingAverage::new(DEFAULT_CAPACITY);
        let mut recent = std::collections::VecDeque::new();
        for i in 0..200_000u32 {
            let v = 10_800.0_f32 + (i % 7) as f32 * 0.031 - 0.05;
            avg.add_value(v);
            recent.push_back(v);
            if recent.len() > DEFAULT_CAPACITY {
                recent.pop_front();
            }
        }
        let truth = recent.iter().map(|&v| f64::from(v)).sum::<f64>() / recent.len() as f64;
        assert!((f64::from(avg.average_value()) - truth).abs() < 1e-3);
    }

    #[test]
    fn clear_resets_window() {
        let mut avg = RollingAverage::default();
        avg.add_value(5.0);
        avg.clear();
        assert_eq!(avg.average_value(), 0.0);
        assert_eq!(avg.capacity(), DEFAULT_CAPACITY);
    }
}
