//! Core data models shared across the sentinel components

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction in which a named metric improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricDirection {
    /// Lower values are better (losses)
    Minimize,
    /// Higher values are better (scores, accuracies)
    Maximize,
}

impl MetricDirection {
    /// Worst-case sentinel for this direction, used when a metric is missing
    pub fn worst(&self) -> f64 {
        match self {
            MetricDirection::Minimize => f64::INFINITY,
            MetricDirection::Maximize => f64::NEG_INFINITY,
        }
    }

    /// Whether `candidate` improves on `best` by more than `threshold`
    pub fn improves(&self, best: f64, candidate: f64, threshold: f64) -> bool {
        match self {
            MetricDirection::Minimize => candidate < best - threshold,
            MetricDirection::Maximize => candidate > best + threshold,
        }
    }

    /// Whether `a` is strictly better than `b` in this direction
    pub fn better(&self, a: f64, b: f64) -> bool {
        match self {
            MetricDirection::Minimize => a < b,
            MetricDirection::Maximize => a > b,
        }
    }
}

/// Per-step metric snapshot fed by the training loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub step: u64,
    pub epoch: u64,
    pub timestamp: DateTime<Utc>,
    pub total_loss: f64,
    /// Named component losses (language, auxiliary objectives, ...)
    pub component_losses: HashMap<String, f64>,
    /// Named domain scores that should not regress during training
    pub domain_scores: HashMap<String, f64>,
    pub gradient_norm: f64,
    pub memory_used_bytes: u64,
    /// Total memory available to the process; 0 when unknown
    pub memory_total_bytes: u64,
    pub learning_rate: f64,
}

impl TrainingMetrics {
    /// Fraction of available memory in use, 0.0 when the total is unknown
    pub fn memory_fraction(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        self.memory_used_bytes as f64 / self.memory_total_bytes as f64
    }
}
