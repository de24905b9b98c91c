//! Checkpoint persistence for training state
//!
//! This module provides:
//! - Atomic checkpoint writes (temp file, validate, rename)
//! - Structural and integrity validation of checkpoint files
//! - Retention policies and a durable history index

mod format;
mod manager;
mod metadata;
mod state;
mod validator;

pub use manager::{CheckpointConfig, CheckpointManager};
pub use metadata::CheckpointMetadata;
pub use state::{Snapshot, TrainingState};
pub use validator::{CheckpointValidation, CheckpointValidator};
