//! Observability for the sentinel components
//!
//! Provides Prometheus instruments for checkpoint, alerting, and validation
//! activity. Exposition is left to the embedding process; this module only
//! keeps the instruments current.

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;

/// Histogram buckets for save/validation durations (in seconds)
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SentinelMetricsInner> = OnceLock::new();

/// Inner structure holding the actual Prometheus instruments
struct SentinelMetricsInner {
    checkpoint_save_seconds: Histogram,
    checkpoints_saved: IntCounter,
    checkpoint_save_failures: IntCounter,
    checkpoints_retained: IntGauge,
    alerts_fired: IntCounter,
    alerts_suppressed: IntCounter,
    anomaly_checks: IntCounter,
    validations: IntCounter,
    validation_seconds: Histogram,
}

impl SentinelMetricsInner {
    fn new() -> Self {
        Self {
            checkpoint_save_seconds: register_histogram!(
                "training_sentinel_checkpoint_save_seconds",
                "Time spent writing a checkpoint to durable storage",
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register checkpoint_save_seconds"),

            checkpoints_saved: register_int_counter!(
                "training_sentinel_checkpoints_saved_total",
                "Total number of checkpoints saved successfully"
            )
            .expect("Failed to register checkpoints_saved_total"),

            checkpoint_save_failures: register_int_counter!(
                "training_sentinel_checkpoint_save_failures_total",
                "Total number of checkpoint saves that failed"
            )
            .expect("Failed to register checkpoint_save_failures_total"),

            checkpoints_retained: register_int_gauge!(
                "training_sentinel_checkpoints_retained",
                "Number of checkpoints currently retained on disk"
            )
            .expect("Failed to register checkpoints_retained"),

            alerts_fired: register_int_counter!(
                "training_sentinel_alerts_fired_total",
                "Total number of anomaly alerts delivered"
            )
            .expect("Failed to register alerts_fired_total"),

            alerts_suppressed: register_int_counter!(
                "training_sentinel_alerts_suppressed_total",
                "Total number of anomaly alerts suppressed by cooldown"
            )
            .expect("Failed to register alerts_suppressed_total"),

            anomaly_checks: register_int_counter!(
                "training_sentinel_anomaly_checks_total",
                "Total number of metric snapshots run through anomaly checks"
            )
            .expect("Failed to register anomaly_checks_total"),

            validations: register_int_counter!(
                "training_sentinel_validations_total",
                "Total number of validation passes completed"
            )
            .expect("Failed to register validations_total"),

            validation_seconds: register_histogram!(
                "training_sentinel_validation_seconds",
                "Wall-clock duration of validation passes",
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register validation_seconds"),
        }
    }
}

/// Sentinel metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying instruments.
#[derive(Clone)]
pub struct SentinelMetrics {
    _private: (),
}

impl Default for SentinelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SentinelMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SentinelMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SentinelMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_save_duration(&self, duration_secs: f64) {
        self.inner().checkpoint_save_seconds.observe(duration_secs);
    }

    pub fn inc_checkpoints_saved(&self) {
        self.inner().checkpoints_saved.inc();
    }

    pub fn inc_checkpoint_save_failures(&self) {
        self.inner().checkpoint_save_failures.inc();
    }

    pub fn set_checkpoints_retained(&self, count: i64) {
        self.inner().checkpoints_retained.set(count);
    }

    pub fn inc_alerts_fired(&self) {
        self.inner().alerts_fired.inc();
    }

    pub fn inc_alerts_suppressed(&self) {
        self.inner().alerts_suppressed.inc();
    }

    pub fn inc_anomaly_checks(&self) {
        self.inner().anomaly_checks.inc();
    }

    pub fn inc_validations(&self) {
        self.inner().validations.inc();
    }

    pub fn observe_validation_duration(&self, duration_secs: f64) {
        self.inner().validation_seconds.observe(duration_secs);
    }
}
