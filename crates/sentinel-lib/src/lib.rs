//! Training Sentinel core library
//!
//! A reliability layer for long-running, resource-expensive training
//! processes:
//! - Durable, atomically-published checkpoints with retention policies
//! - Rolling-statistics anomaly detection with deduplicated alerting
//! - Scheduled validation passes with early stopping

pub mod anomaly;
pub mod checkpoint;
pub mod error;
pub mod models;
pub mod observability;
pub mod validation;

pub use anomaly::{AlertManager, AlertSeverity, AnomalyAlert, AnomalyDetector, AnomalyKind};
pub use checkpoint::{
    CheckpointConfig, CheckpointManager, CheckpointMetadata, CheckpointValidation,
    CheckpointValidator, TrainingState,
};
pub use error::CheckpointError;
pub use models::*;
pub use observability::SentinelMetrics;
pub use validation::{AutomatedValidator, ValidationConfig, ValidationMetrics, ValidationModel};
