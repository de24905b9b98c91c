//! Anomaly detection for training telemetry
//!
//! This module provides:
//! - Rolling per-metric statistics with z-score outlier detection
//! - Classification of metric snapshots into typed anomaly alerts
//! - Deduplicated alert delivery with a durable append-only log

mod alerts;
mod detector;
mod rolling;

pub use alerts::{AlertManager, AlertSeverity, AlertSummary, AnomalyAlert, AnomalyKind};
pub use detector::{AnomalyDetectionConfig, AnomalyDetector};
pub use rolling::{MetricWindows, MIN_SAMPLES};
