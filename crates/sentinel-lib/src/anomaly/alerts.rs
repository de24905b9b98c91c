//! Alert types, deduplication, and distribution
//!
//! Handles:
//! - Per-kind cooldown so an alert storm collapses into one delivery
//! - An append-only JSONL alert log for durable history
//! - Synchronous fan-out to registered observer callbacks

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::observability::SentinelMetrics;

/// Default alert cooldown per anomaly kind (15 minutes)
const DEFAULT_COOLDOWN_SECS: u64 = 15 * 60;

/// Kinds of training anomalies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    LossSpike,
    LossPlateau,
    GradientExplosion,
    GradientVanishing,
    MetricRegression,
    HighMemory,
    TrainingStall,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::LossSpike => "loss_spike",
            AnomalyKind::LossPlateau => "loss_plateau",
            AnomalyKind::GradientExplosion => "gradient_explosion",
            AnomalyKind::GradientVanishing => "gradient_vanishing",
            AnomalyKind::MetricRegression => "metric_regression",
            AnomalyKind::HighMemory => "high_memory",
            AnomalyKind::TrainingStall => "training_stall",
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Low => write!(f, "low"),
            AlertSeverity::Medium => write!(f, "medium"),
            AlertSeverity::High => write!(f, "high"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// A single classified anomaly, immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub id: String,
    pub kind: AnomalyKind,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    pub step: u64,
    pub epoch: u64,
    pub description: String,
    /// Metric readings that triggered the classification.
    pub observed: HashMap<String, f64>,
    pub suggested_actions: Vec<String>,
}

type AlertCallback = Box<dyn Fn(&AnomalyAlert) + Send + Sync>;

/// Deduplicates, persists, and distributes alerts.
///
/// Cooldown is scoped per anomaly kind: a critical gradient alert never
/// suppresses an unrelated memory alert.
pub struct AlertManager {
    cooldown: Duration,
    log_path: PathBuf,
    history: Mutex<Vec<AnomalyAlert>>,
    last_fired: Mutex<HashMap<AnomalyKind, Instant>>,
    callbacks: Mutex<Vec<AlertCallback>>,
    metrics: SentinelMetrics,
}

impl AlertManager {
    /// Create an alert manager logging to the given append-only file.
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).ok();
        }
        AlertManager {
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            log_path,
            history: Mutex::new(Vec::new()),
            last_fired: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
            metrics: SentinelMetrics::new(),
        }
    }

    /// Set a custom cooldown window.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Register an observer invoked synchronously for every delivered alert.
    ///
    /// Callbacks run on the detecting thread and are expected to be quick
    /// non-blocking observers (logging, metric export).
    pub fn register_callback(&self, callback: impl Fn(&AnomalyAlert) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().push(Box::new(callback));
    }

    /// Deliver an alert unless its kind is still cooling down.
    ///
    /// Suppressed alerts mutate nothing and invoke no callbacks. Returns
    /// whether the alert was delivered.
    pub fn generate_alert(&self, alert: AnomalyAlert) -> bool {
        {
            let last_fired = self.last_fired.lock().unwrap();
            if let Some(last) = last_fired.get(&alert.kind) {
                if last.elapsed() < self.cooldown {
                    debug!(kind = %alert.kind, "Alert suppressed by cooldown");
                    self.metrics.inc_alerts_suppressed();
                    return false;
                }
            }
        }

        self.last_fired
            .lock()
            .unwrap()
            .insert(alert.kind, Instant::now());

        warn!(
            kind = %alert.kind,
            severity = %alert.severity,
            step = alert.step,
            epoch = alert.epoch,
            "Anomaly detected: {}",
            alert.description
        );

        self.append_to_log(&alert);
        self.history.lock().unwrap().push(alert.clone());

        for callback in self.callbacks.lock().unwrap().iter() {
            callback(&alert);
        }

        self.metrics.inc_alerts_fired();
        true
    }

    /// Alerts delivered within the last `hours` hours.
    pub fn get_recent_alerts(&self, hours: i64) -> Vec<AnomalyAlert> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Counts of delivered alerts over the last 24 hours, by kind and severity.
    pub fn summary(&self) -> AlertSummary {
        let recent = self.get_recent_alerts(24);
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        for alert in &recent {
            *by_kind.entry(alert.kind.to_string()).or_default() += 1;
            *by_severity.entry(alert.severity.to_string()).or_default() += 1;
        }
        AlertSummary {
            total_last_24h: recent.len(),
            by_kind,
            by_severity,
        }
    }

    /// One JSON record per line; a write failure degrades to a warning so an
    /// unwritable log never blocks detection.
    fn append_to_log(&self, alert: &AnomalyAlert) {
        let line = match serde_json::to_string(alert) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize alert for log");
                return;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            warn!(
                path = %self.log_path.display(),
                error = %e,
                "Failed to append alert to log"
            );
        }
    }
}

/// Aggregated view over recently delivered alerts.
#[derive(Debug, Clone, Serialize)]
pub struct AlertSummary {
    pub total_last_24h: usize,
    pub by_kind: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
}
