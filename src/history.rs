//! Bounded rolling history of connectivity metrics.
//!
//! Insertion order is preserved; once the configured capacity is reached the
//! oldest sample is evicted first.

use std::collections::VecDeque;

use crate::types::NetworkMetric;

/// FIFO ring of observed metrics with a fixed capacity.
#[derive(Debug, Clone)]
pub struct MetricHistory {
    samples: VecDeque<NetworkMetric>,
    capacity: usize,
}

impl MetricHistory {
    /// Create an empty history. A zero capacity is bumped to 1 so a push
    /// always retains the newest sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a metric, evicting the oldest sample when full.
    pub fn push(&mut self, metric: NetworkMetric) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(metric);
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

    /// Most recent sample, if any.
    pub fn latest(&self) -> Option<&NetworkMetric> {
        self.samples.back()
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<NetworkMetric> {
        self.samples.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkMetric> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NetworkMetric;

    fn metric(latency: f64) -> NetworkMetric {
        NetworkMetric::new("wifi", latency, 0.0)
    }

    #[test]
    fn test_push_and_order() {
        let mut h = MetricHistory::new(10);
        for i in 0..5 {
            h.push(metric(i as f64));
        }
        assert_eq!(h.len(), 5);
        let latencies: Vec<f64> = h.iter().map(|m| m.latency_ms).collect();
        assert_eq!(latencies, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(h.latest().unwrap().latency_ms, 4.0);
    }

    #[test]
    fn test_eviction_fifo() {
        let mut h = MetricHistory::new(3);
        for i in 0..5 {
            h.push(metric(i as f64));
        }
        assert_eq!(h.len(), 3);
        let latencies: Vec<f64> = h.iter().map(|m| m.latency_ms).collect();
        // oldest two evicted
        assert_eq!(latencies, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_zero_capacity_retains_newest() {
        let mut h = MetricHistory::new(0);
        h.push(metric(1.0));
        h.push(metric(2.0));
        assert_eq!(h.len(), 1);
        assert_eq!(h.latest().unwrap().latency_ms, 2.0);
    }

    #[test]
    fn test_snapshot_is_copy() {
        let mut h = MetricHistory::new(4);
        h.push(metric(7.0));
        let snap = h.snapshot();
        h.push(metric(8.0));
        assert_eq!(snap.len(), 1);
        assert_eq!(h.len(), 2);
    }
}
