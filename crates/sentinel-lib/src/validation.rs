//! Scheduled validation with early stopping
//!
//! Runs periodic evaluation passes against held-out data, tracks whether the
//! primary metric keeps improving, and tells the training loop when further
//! iteration is futile.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::MetricDirection;
use crate::observability::SentinelMetrics;

/// Configuration for the automated validator
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Steps between validation passes
    pub interval_steps: u64,
    /// Held-out samples evaluated per pass
    pub sample_size: usize,
    /// Metric driving early stopping; "total_loss" or any named metric
    pub primary_metric: String,
    pub direction: MetricDirection,
    /// Consecutive non-improving validations tolerated before stopping
    pub patience: u32,
    /// Improvement below this margin does not reset patience
    pub improvement_threshold: f64,
    pub enable_early_stopping: bool,
    pub report_dir: PathBuf,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            interval_steps: 500,
            sample_size: 1000,
            primary_metric: "total_loss".to_string(),
            direction: MetricDirection::Minimize,
            patience: 5,
            improvement_threshold: 0.001,
            enable_early_stopping: true,
            report_dir: PathBuf::from("validation_reports"),
        }
    }
}

/// Results of one validation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub step: u64,
    pub epoch: u64,
    pub timestamp: DateTime<Utc>,
    pub total_loss: f64,
    pub component_losses: HashMap<String, f64>,
    pub domain_scores: HashMap<String, f64>,
    pub duration_secs: f64,
    pub sample_count: usize,
}

/// What a model evaluation pass produced.
#[derive(Debug, Clone, Default)]
pub struct EvaluationOutcome {
    pub total_loss: f64,
    pub component_losses: HashMap<String, f64>,
    pub domain_scores: HashMap<String, f64>,
    pub sample_count: usize,
}

/// External model handle: a train/evaluate mode toggle plus a bounded
/// forward-evaluation entry point over held-out data.
pub trait ValidationModel {
    fn set_training(&mut self, training: bool);
    fn evaluate(&mut self, sample_count: usize) -> Result<EvaluationOutcome>;
}

/// Schedules validation passes and implements early stopping.
pub struct AutomatedValidator {
    config: ValidationConfig,
    history: Vec<ValidationMetrics>,
    last_validation_step: Option<u64>,
    best_metric: Option<f64>,
    patience_counter: u32,
    metrics: SentinelMetrics,
}

impl AutomatedValidator {
    pub fn new(config: ValidationConfig) -> Self {
        AutomatedValidator {
            config,
            history: Vec::new(),
            last_validation_step: None,
            best_metric: None,
            patience_counter: 0,
            metrics: SentinelMetrics::new(),
        }
    }

    /// Whether a validation pass is due: always on the first call, then once
    /// per configured step interval.
    pub fn should_validate(&self, step: u64) -> bool {
        match self.last_validation_step {
            None => true,
            Some(last) => step.saturating_sub(last) >= self.config.interval_steps,
        }
    }

    /// Run one validation pass. The model is toggled back into training mode
    /// unconditionally, even when evaluation fails, so it is never stranded
    /// in evaluation mode.
    pub fn validate_model(
        &mut self,
        model: &mut dyn ValidationModel,
        step: u64,
        epoch: u64,
    ) -> Result<ValidationMetrics> {
        let started = Instant::now();

        model.set_training(false);
        let outcome = model.evaluate(self.config.sample_size);
        model.set_training(true);

        let outcome = outcome.context("validation evaluation failed")?;
        let duration_secs = started.elapsed().as_secs_f64();

        let validation = ValidationMetrics {
            step,
            epoch,
            timestamp: Utc::now(),
            total_loss: outcome.total_loss,
            component_losses: outcome.component_losses,
            domain_scores: outcome.domain_scores,
            duration_secs,
            sample_count: outcome.sample_count,
        };

        self.update_early_stopping(&validation);
        self.history.push(validation.clone());
        self.last_validation_step = Some(step);

        self.metrics.inc_validations();
        self.metrics.observe_validation_duration(duration_secs);
        info!(
            step,
            epoch,
            total_loss = validation.total_loss,
            duration_secs,
            patience = self.patience_counter,
            "Validation pass complete"
        );

        Ok(validation)
    }

    /// Whether early stopping is enabled and patience has run out.
    pub fn should_stop_early(&self) -> bool {
        self.config.enable_early_stopping && self.patience_counter >= self.config.patience
    }

    /// Best primary-metric value seen so far, if any validation has run.
    pub fn best_metric(&self) -> Option<f64> {
        self.best_metric
    }

    /// Consecutive non-improving validations so far.
    pub fn patience_counter(&self) -> u32 {
        self.patience_counter
    }

    pub fn history(&self) -> &[ValidationMetrics] {
        &self.history
    }

    /// Write the full validation history to a timestamped report file.
    ///
    /// An empty history is an explicit no-op (`Ok(None)`), not a failure.
    pub fn save_validation_report(&self) -> Result<Option<PathBuf>> {
        if self.history.is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(&self.config.report_dir).with_context(|| {
            format!(
                "Failed to create report directory {}",
                self.config.report_dir.display()
            )
        })?;

        let filename = format!(
            "validation_report_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let path = self.config.report_dir.join(filename);

        let report = ValidationReport {
            validation_history: &self.history,
            total_validations: self.history.len(),
            primary_metric: &self.config.primary_metric,
            best_metric: self.best_metric,
        };
        let json = serde_json::to_vec_pretty(&report)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write validation report {}", path.display()))?;

        info!(path = %path.display(), validations = self.history.len(), "Validation report saved");
        Ok(Some(path))
    }

    fn update_early_stopping(&mut self, validation: &ValidationMetrics) {
        if !self.config.enable_early_stopping {
            return;
        }

        let value = self.primary_metric_value(validation);
        let best = self.best_metric.unwrap_or_else(|| self.config.direction.worst());

        if self
            .config
            .direction
            .improves(best, value, self.config.improvement_threshold)
        {
            self.best_metric = Some(value);
            self.patience_counter = 0;
        } else {
            self.patience_counter += 1;
        }
    }

    /// Resolve the primary metric from a validation result. A missing metric
    /// resolves to the worst-case sentinel so it counts as no improvement.
    fn primary_metric_value(&self, validation: &ValidationMetrics) -> f64 {
        let name = &self.config.primary_metric;
        let found = if name == "total_loss" {
            Some(validation.total_loss)
        } else {
            validation
                .component_losses
                .get(name)
                .or_else(|| validation.domain_scores.get(name))
                .copied()
        };
        found.unwrap_or_else(|| {
            warn!(metric = %name, "Primary metric missing from validation result");
            self.config.direction.worst()
        })
    }
}

#[derive(Serialize)]
struct ValidationReport<'a> {
    validation_history: &'a [ValidationMetrics],
    total_validations: usize,
    primary_metric: &'a str,
    best_metric: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    /// Scripted model yielding a fixed loss sequence.
    struct ScriptedModel {
        losses: Vec<f64>,
        next: usize,
        training: bool,
        mode_transitions: Vec<bool>,
        fail: bool,
    }

    impl ScriptedModel {
        fn new(losses: Vec<f64>) -> Self {
            ScriptedModel {
                losses,
                next: 0,
                training: true,
                mode_transitions: Vec::new(),
                fail: false,
            }
        }
    }

    impl ValidationModel for ScriptedModel {
        fn set_training(&mut self, training: bool) {
            self.training = training;
            self.mode_transitions.push(training);
        }

        fn evaluate(&mut self, sample_count: usize) -> Result<EvaluationOutcome> {
            if self.fail {
                return Err(anyhow!("evaluation exploded"));
            }
            let loss = self.losses[self.next.min(self.losses.len() - 1)];
            self.next += 1;
            Ok(EvaluationOutcome {
                total_loss: loss,
                component_losses: HashMap::new(),
                domain_scores: HashMap::new(),
                sample_count,
            })
        }
    }

    fn test_config(dir: &std::path::Path) -> ValidationConfig {
        ValidationConfig {
            report_dir: dir.join("reports"),
            ..Default::default()
        }
    }

    #[test]
    fn test_should_validate_first_call_and_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut validator = AutomatedValidator::new(test_config(dir.path()));
        let mut model = ScriptedModel::new(vec![1.0]);

        // No prior validation: always due.
        assert!(validator.should_validate(1));

        validator.validate_model(&mut model, 1, 0).unwrap();
        assert!(!validator.should_validate(100));
        assert!(validator.should_validate(501));
    }

    #[test]
    fn test_model_mode_restored_around_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut validator = AutomatedValidator::new(test_config(dir.path()));
        let mut model = ScriptedModel::new(vec![1.0]);

        validator.validate_model(&mut model, 1, 0).unwrap();
        assert!(model.training);
        assert_eq!(model.mode_transitions, vec![false, true]);
    }

    #[test]
    fn test_model_mode_restored_even_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut validator = AutomatedValidator::new(test_config(dir.path()));
        let mut model = ScriptedModel::new(vec![1.0]);
        model.fail = true;

        let result = validator.validate_model(&mut model, 1, 0);
        assert!(result.is_err());
        assert!(model.training, "model stranded in evaluation mode");
        assert!(validator.history().is_empty());
    }

    #[test]
    fn test_early_stopping_after_patience_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut validator = AutomatedValidator::new(test_config(dir.path()));
        // First validation improves on the sentinel; the next five do not.
        let mut model = ScriptedModel::new(vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);

        for i in 1u64..=6 {
            validator.validate_model(&mut model, i * 500, 0).unwrap();
            if i < 6 {
                assert!(
                    !validator.should_stop_early(),
                    "stopped early after {i} validations"
                );
            }
        }
        // Exactly the fifth consecutive non-improvement trips the stop.
        assert_eq!(validator.patience_counter(), 5);
        assert!(validator.should_stop_early());
    }

    #[test]
    fn test_improvement_resets_patience() {
        let dir = tempfile::tempdir().unwrap();
        let mut validator = AutomatedValidator::new(test_config(dir.path()));
        let mut model = ScriptedModel::new(vec![1.0, 1.0, 1.0, 0.5, 1.0]);

        for step in [500, 1000, 1500, 2000, 2500] {
            validator.validate_model(&mut model, step, 0).unwrap();
        }
        // The 0.5 at step 2000 reset the counter; only step 2500 counts.
        assert_eq!(validator.patience_counter(), 1);
        assert!(!validator.should_stop_early());
    }

    #[test]
    fn test_missing_primary_metric_counts_as_no_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.primary_metric = "coherence_score".to_string();
        config.direction = MetricDirection::Maximize;
        let mut validator = AutomatedValidator::new(config);
        let mut model = ScriptedModel::new(vec![1.0, 1.0]);

        validator.validate_model(&mut model, 500, 0).unwrap();
        validator.validate_model(&mut model, 1000, 0).unwrap();
        assert_eq!(validator.patience_counter(), 2);
    }

    #[test]
    fn test_report_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut validator = AutomatedValidator::new(test_config(dir.path()));
        let mut model = ScriptedModel::new(vec![1.0, 0.8]);

        validator.validate_model(&mut model, 500, 0).unwrap();
        validator.validate_model(&mut model, 1000, 1).unwrap();

        let path = validator.save_validation_report().unwrap().expect("path");
        let json = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["total_validations"], 2);
        assert_eq!(parsed["validation_history"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_history_report_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let validator = AutomatedValidator::new(test_config(dir.path()));
        assert!(validator.save_validation_report().unwrap().is_none());
    }
}
