//! Bounded window of latency samples.

use std::collections::VecDeque;

/// Keeps the most recent `capacity` samples, dropping the oldest.
///
/// Insertion and averaging are O(1); percentiles sort a copy.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    sum: f64,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum -= oldest;
            }
        }
        self.samples.push_back(sample);
        self.sum += sample;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.sum / self.samples.len() as f64)
        }
    }

    /// Nearest-rank percentile, `p` in `[0, 100]`.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = rank.clamp(1, sorted.len()) - 1;
        Some(sorted[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_drops_oldest() {
        let mut window = LatencyWindow::new(3);
        assert_eq!(window.average(), None);

        window.push(10.0);
        window.push(20.0);
        window.push(30.0);
        assert_eq!(window.average(), Some(20.0));

        window.push(60.0);
        assert_eq!(window.len(), 3);
        assert_eq!(window.average(), Some(110.0 / 3.0));
    }

    #[test]
    fn test_percentile() {
        let mut window = LatencyWindow::new(100);
        for i in 1..=100 {
            window.push(i as f64);
        }
        assert_eq!(window.percentile(99.0), Some(99.0));
        assert_eq!(window.percentile(50.0), Some(50.0));
        assert_eq!(window.percentile(100.0), Some(100.0));
    }
}
