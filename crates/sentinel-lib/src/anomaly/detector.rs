//! Training anomaly classification
//!
//! Runs a set of independent checks over each incoming metric snapshot:
//! statistical loss spikes against a rolling baseline, hard gradient and
//! memory thresholds, domain-score regressions, and loss plateau/stall
//! patterns. Every fired condition becomes an alert handed to the alert
//! manager; one snapshot may yield zero, one, or several alerts.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use crate::anomaly::alerts::{AlertManager, AlertSeverity, AnomalyAlert, AnomalyKind};
use crate::anomaly::rolling::MetricWindows;
use crate::models::TrainingMetrics;
use crate::observability::SentinelMetrics;

/// Number of recent losses examined for plateau detection
const PLATEAU_WINDOW: usize = 50;

/// Loss variance below this is considered a plateau
const PLATEAU_VARIANCE: f64 = 1e-6;

/// Number of recent losses examined for stall detection
const STALL_WINDOW: usize = 100;

/// Fewer distinct loss values (at 1e-4 resolution) than this means a stall
const STALL_MIN_DISTINCT: usize = 5;

/// Configuration for anomaly detection
#[derive(Debug, Clone)]
pub struct AnomalyDetectionConfig {
    /// Capacity of each per-metric rolling window
    pub rolling_window_size: usize,
    /// Generic z-score threshold for statistical outliers
    pub z_score_threshold: f64,
    /// Stricter z-score a loss must exceed to count as a spike
    pub loss_spike_z_threshold: f64,
    pub gradient_explosion_threshold: f64,
    pub gradient_vanishing_threshold: f64,
    /// Memory usage fraction above which an alert fires
    pub memory_fraction_threshold: f64,
    /// Drop in a domain score (vs. its previous reading) that counts as regression
    pub score_regression_threshold: f64,
    /// Run the checks at most once per this many steps
    pub check_interval_steps: u64,
    pub alert_cooldown: Duration,
    /// Append-only alert log, one JSON record per line
    pub alert_log: PathBuf,
}

impl Default for AnomalyDetectionConfig {
    fn default() -> Self {
        AnomalyDetectionConfig {
            rolling_window_size: 100,
            z_score_threshold: 2.0,
            loss_spike_z_threshold: 3.0,
            gradient_explosion_threshold: 100.0,
            gradient_vanishing_threshold: 1e-7,
            memory_fraction_threshold: 0.95,
            score_regression_threshold: 0.1,
            check_interval_steps: 1,
            alert_cooldown: Duration::from_secs(15 * 60),
            alert_log: PathBuf::from("alerts/alerts.jsonl"),
        }
    }
}

/// Classifies training metric snapshots into anomaly alerts.
///
/// Checks are independent: a value unusable by one check never prevents the
/// others from running on the same snapshot. Detection is advisory and never
/// errors out to the training loop.
pub struct AnomalyDetector {
    config: AnomalyDetectionConfig,
    windows: MetricWindows,
    alerts: AlertManager,
    recent_losses: VecDeque<f64>,
    last_scores: HashMap<String, f64>,
    last_check_step: Option<u64>,
    metrics: SentinelMetrics,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyDetectionConfig) -> Self {
        let windows = MetricWindows::new(config.rolling_window_size, config.z_score_threshold);
        let alerts =
            AlertManager::new(config.alert_log.clone()).with_cooldown(config.alert_cooldown);
        AnomalyDetector {
            config,
            windows,
            alerts,
            recent_losses: VecDeque::with_capacity(STALL_WINDOW),
            last_scores: HashMap::new(),
            last_check_step: None,
            metrics: SentinelMetrics::new(),
        }
    }

    /// Access the alert manager for callback registration and history queries.
    pub fn alert_manager(&self) -> &AlertManager {
        &self.alerts
    }

    /// Classify a metric snapshot, handing every fired condition to the
    /// alert manager. Returns the classified alerts regardless of whether
    /// cooldown suppressed their delivery.
    pub fn process_metrics(&mut self, snapshot: &TrainingMetrics) -> Vec<AnomalyAlert> {
        let due = match self.last_check_step {
            None => true,
            Some(last) => snapshot.step.saturating_sub(last) >= self.config.check_interval_steps,
        };
        if !due {
            return Vec::new();
        }
        self.last_check_step = Some(snapshot.step);
        self.metrics.inc_anomaly_checks();

        let mut fired = Vec::new();
        fired.extend(self.check_loss(snapshot));
        fired.extend(self.check_gradients(snapshot));
        fired.extend(self.check_memory(snapshot));
        fired.extend(self.check_score_regressions(snapshot));
        fired.extend(self.check_stall(snapshot));

        for alert in &fired {
            self.alerts.generate_alert(alert.clone());
        }
        fired
    }

    fn check_loss(&mut self, m: &TrainingMetrics) -> Vec<AnomalyAlert> {
        let mut out = Vec::new();

        // Score against the baseline before the probe joins it.
        let (anomalous, z_score) = self.windows.detect("total_loss", m.total_loss);
        self.windows.observe("total_loss", m.total_loss);
        for (name, value) in &m.component_losses {
            self.windows.observe(name, *value);
        }
        if m.total_loss.is_finite() {
            if self.recent_losses.len() == STALL_WINDOW {
                self.recent_losses.pop_front();
            }
            self.recent_losses.push_back(m.total_loss);
        }

        if anomalous && z_score.abs() > self.config.loss_spike_z_threshold {
            out.push(self.alert(
                m,
                AnomalyKind::LossSpike,
                AlertSeverity::High,
                format!(
                    "Loss spike detected: {:.4} (z-score: {:.2})",
                    m.total_loss, z_score
                ),
                HashMap::from([
                    ("total_loss".to_string(), m.total_loss),
                    ("z_score".to_string(), z_score),
                ]),
                vec![
                    "Check the data batch for outliers".to_string(),
                    "Consider reducing the learning rate".to_string(),
                    "Review gradient clipping settings".to_string(),
                ],
            ));
        }

        if self.recent_losses.len() >= PLATEAU_WINDOW {
            let recent: Vec<f64> = self
                .recent_losses
                .iter()
                .rev()
                .take(PLATEAU_WINDOW)
                .copied()
                .collect();
            let mean = recent.iter().sum::<f64>() / recent.len() as f64;
            let variance =
                recent.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / recent.len() as f64;
            if variance < PLATEAU_VARIANCE {
                out.push(self.alert(
                    m,
                    AnomalyKind::LossPlateau,
                    AlertSeverity::Medium,
                    format!("Loss plateau detected: variance={variance:.2e}"),
                    HashMap::from([("loss_variance".to_string(), variance)]),
                    vec![
                        "Increase the learning rate".to_string(),
                        "Introduce learning rate scheduling".to_string(),
                        "Check for vanishing gradients".to_string(),
                    ],
                ));
            }
        }

        out
    }

    fn check_gradients(&self, m: &TrainingMetrics) -> Vec<AnomalyAlert> {
        let mut out = Vec::new();

        if m.gradient_norm > self.config.gradient_explosion_threshold {
            out.push(self.alert(
                m,
                AnomalyKind::GradientExplosion,
                AlertSeverity::Critical,
                format!("Gradient explosion: norm={:.2e}", m.gradient_norm),
                HashMap::from([("gradient_norm".to_string(), m.gradient_norm)]),
                vec![
                    "Apply gradient clipping".to_string(),
                    "Reduce the learning rate".to_string(),
                    "Check model initialization".to_string(),
                ],
            ));
        }

        if m.gradient_norm < self.config.gradient_vanishing_threshold {
            out.push(self.alert(
                m,
                AnomalyKind::GradientVanishing,
                AlertSeverity::High,
                format!("Gradient vanishing: norm={:.2e}", m.gradient_norm),
                HashMap::from([("gradient_norm".to_string(), m.gradient_norm)]),
                vec![
                    "Increase the learning rate".to_string(),
                    "Add skip connections".to_string(),
                    "Review activation functions".to_string(),
                ],
            ));
        }

        out
    }

    fn check_memory(&self, m: &TrainingMetrics) -> Vec<AnomalyAlert> {
        let fraction = m.memory_fraction();
        if fraction <= self.config.memory_fraction_threshold {
            return Vec::new();
        }
        vec![self.alert(
            m,
            AnomalyKind::HighMemory,
            AlertSeverity::Medium,
            format!("Memory usage at {:.1}% of available", fraction * 100.0),
            HashMap::from([
                ("memory_fraction".to_string(), fraction),
                ("memory_used_bytes".to_string(), m.memory_used_bytes as f64),
            ]),
            vec![
                "Reduce the batch size".to_string(),
                "Enable gradient checkpointing".to_string(),
                "Check the data loader for accumulation".to_string(),
            ],
        )]
    }

    fn check_score_regressions(&mut self, m: &TrainingMetrics) -> Vec<AnomalyAlert> {
        let mut out = Vec::new();
        let threshold = self.config.score_regression_threshold;

        for (domain, score) in &m.domain_scores {
            if !score.is_finite() {
                continue;
            }
            if let Some(previous) = self.last_scores.get(domain) {
                let drop = previous - score;
                if drop > threshold {
                    let severity = if drop > 2.0 * threshold {
                        AlertSeverity::High
                    } else {
                        AlertSeverity::Medium
                    };
                    out.push(self.alert(
                        m,
                        AnomalyKind::MetricRegression,
                        severity,
                        format!("Score regression in {domain}: dropped by {drop:.3}"),
                        HashMap::from([
                            ("current_score".to_string(), *score),
                            ("previous_score".to_string(), *previous),
                        ]),
                        vec![
                            format!("Review recent training data affecting {domain}"),
                            "Compare against the last validation report".to_string(),
                            "Consider rolling back to the best checkpoint".to_string(),
                        ],
                    ));
                }
            }
            self.last_scores.insert(domain.clone(), *score);
        }

        out
    }

    fn check_stall(&self, m: &TrainingMetrics) -> Vec<AnomalyAlert> {
        if self.recent_losses.len() < STALL_WINDOW {
            return Vec::new();
        }
        let distinct: std::collections::HashSet<String> = self
            .recent_losses
            .iter()
            .map(|loss| format!("{loss:.4}"))
            .collect();
        if distinct.len() >= STALL_MIN_DISTINCT {
            return Vec::new();
        }
        vec![self.alert(
            m,
            AnomalyKind::TrainingStall,
            AlertSeverity::Medium,
            "Training appears stalled with minimal loss variation".to_string(),
            HashMap::from([("distinct_loss_values".to_string(), distinct.len() as f64)]),
            vec![
                "Adjust the learning rate".to_string(),
                "Verify data shuffling".to_string(),
                "Check for gradient flow issues".to_string(),
            ],
        )]
    }

    fn alert(
        &self,
        m: &TrainingMetrics,
        kind: AnomalyKind,
        severity: AlertSeverity,
        description: String,
        observed: HashMap<String, f64>,
        suggested_actions: Vec<String>,
    ) -> AnomalyAlert {
        AnomalyAlert {
            id: format!("{kind}_{}", m.step),
            kind,
            severity,
            timestamp: m.timestamp,
            step: m.step,
            epoch: m.epoch,
            description,
            observed,
            suggested_actions,
        }
    }
}
