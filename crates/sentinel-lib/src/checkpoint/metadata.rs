//! Checkpoint metadata recorded in the history index

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata describing one saved checkpoint.
///
/// Immutable after save, except for [`CheckpointMetadata::mark_corrupted`]
/// when a later validation pass finds the file untrustworthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub checkpoint_id: String,
    pub created_at: DateTime<Utc>,
    pub step: u64,
    pub epoch: u64,

    /// Total loss at save time; 0.0 when the caller supplied none.
    pub loss: f64,
    pub learning_rate: f64,
    /// Every named metric the caller supplied at save time.
    pub metric_snapshot: HashMap<String, f64>,

    /// Process resident set size when the save was initiated.
    pub process_memory_bytes: Option<u64>,
    /// On-disk size of the finished checkpoint file.
    pub size_bytes: u64,

    pub is_best: bool,
    pub is_corrupted: bool,

    /// Open-ended caller metadata; values are JSON-encoded strings by convention.
    #[serde(default)]
    pub custom: HashMap<String, String>,
}

impl CheckpointMetadata {
    pub fn mark_corrupted(&mut self) {
        self.is_corrupted = true;
    }
}
