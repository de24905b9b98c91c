//! Rolling per-metric statistics
//!
//! Maintains a fixed-capacity FIFO window per named metric and scores new
//! values by their z-score against the window's mean and standard deviation.

use std::collections::{HashMap, VecDeque};

use tracing::warn;

/// Minimum samples required before any detection fires
pub const MIN_SAMPLES: usize = 10;

/// Minimum fraction of the window capacity that must be filled
const MIN_FILL_FRACTION: f64 = 0.1;

/// Per-metric rolling windows with outlier scoring.
///
/// Detection is guarded against cold starts: until a window holds at least
/// `max(MIN_SAMPLES, 10% of capacity)` values, every probe reports
/// not-anomalous with a zero score, no matter how extreme the value.
pub struct MetricWindows {
    capacity: usize,
    threshold: f64,
    windows: HashMap<String, VecDeque<f64>>,
}

impl MetricWindows {
    pub fn new(capacity: usize, threshold: f64) -> Self {
        MetricWindows {
            capacity: capacity.max(1),
            threshold,
            windows: HashMap::new(),
        }
    }

    fn min_fill(&self) -> usize {
        MIN_SAMPLES.max((self.capacity as f64 * MIN_FILL_FRACTION).ceil() as usize)
    }

    /// Record a value into the metric's window, evicting the oldest at capacity.
    pub fn observe(&mut self, metric: &str, value: f64) {
        if !value.is_finite() {
            warn!(metric = %metric, "Skipping non-finite metric value");
            return;
        }
        let window = self
            .windows
            .entry(metric.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(value);
    }

    /// Score a value against the metric's current window.
    ///
    /// Returns `(is_anomalous, z_score)`. A window below its minimum fill or
    /// with zero spread can never flag an anomaly.
    pub fn detect(&self, metric: &str, value: f64) -> (bool, f64) {
        let Some(window) = self.windows.get(metric) else {
            return (false, 0.0);
        };
        if window.len() < self.min_fill() || !value.is_finite() {
            return (false, 0.0);
        }

        let count = window.len() as f64;
        let mean = window.iter().sum::<f64>() / count;
        let variance = window
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / (count - 1.0);
        let std_dev = variance.sqrt();

        if std_dev < f64::EPSILON {
            return (false, 0.0);
        }

        let z_score = (value - mean) / std_dev;
        (z_score.abs() > self.threshold, z_score)
    }

    /// Number of samples currently held for a metric.
    pub fn sample_count(&self, metric: &str) -> usize {
        self.windows.get(metric).map_or(0, |w| w.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_start_guard() {
        let mut windows = MetricWindows::new(100, 2.0);
        for i in 0..9 {
            windows.observe("loss", 1.0 + i as f64 * 0.01);
        }

        // Nine samples is below the minimum fill: even an absurd value passes.
        let (anomalous, z) = windows.detect("loss", 1e9);
        assert!(!anomalous);
        assert_eq!(z, 0.0);
    }

    #[test]
    fn test_spike_detected_after_fill() {
        let mut windows = MetricWindows::new(10, 2.0);
        for value in [4.9, 5.0, 5.1, 4.8, 5.2, 4.7, 5.3, 4.6, 5.4, 5.0] {
            windows.observe("loss", value);
        }

        let (anomalous, z) = windows.detect("loss", 15.0);
        assert!(anomalous);
        assert!(z > 2.0, "z = {z}");
    }

    #[test]
    fn test_in_range_value_not_flagged() {
        let mut windows = MetricWindows::new(10, 2.0);
        for value in [4.9, 5.0, 5.1, 4.8, 5.2, 4.7, 5.3, 4.6, 5.4, 5.0] {
            windows.observe("loss", value);
        }

        let (anomalous, _) = windows.detect("loss", 5.1);
        assert!(!anomalous);
    }

    #[test]
    fn test_zero_spread_cannot_flag() {
        let mut windows = MetricWindows::new(10, 2.0);
        for _ in 0..10 {
            windows.observe("loss", 3.0);
        }

        let (anomalous, z) = windows.detect("loss", 100.0);
        assert!(!anomalous);
        assert_eq!(z, 0.0);
    }

    #[test]
    fn test_oldest_evicted_at_capacity() {
        let mut windows = MetricWindows::new(5, 2.0);
        for i in 0..8 {
            windows.observe("loss", i as f64);
        }
        assert_eq!(windows.sample_count("loss"), 5);
    }

    #[test]
    fn test_non_finite_values_skipped() {
        let mut windows = MetricWindows::new(10, 2.0);
        windows.observe("loss", f64::NAN);
        windows.observe("loss", f64::INFINITY);
        assert_eq!(windows.sample_count("loss"), 0);
    }

    #[test]
    fn test_unknown_metric_never_anomalous() {
        let windows = MetricWindows::new(10, 2.0);
        let (anomalous, z) = windows.detect("never_seen", 1e12);
        assert!(!anomalous);
        assert_eq!(z, 0.0);
    }
}
