//! On-disk checkpoint format
//!
//! A checkpoint file is a bincode [`CheckpointEnvelope`]: the SHA-256 of the
//! payload bytes followed by the payload itself, which is in turn a bincode
//! [`CheckpointPayload`]. Keeping the hash outside the hashed bytes makes
//! "recompute excluding the hash field" structural rather than a
//! field-filtering convention.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::checkpoint::manager::CheckpointConfig;
use crate::checkpoint::metadata::CheckpointMetadata;
use crate::checkpoint::state::TrainingState;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CheckpointEnvelope {
    /// SHA-256 of `payload`, hex encoded.
    pub payload_sha256: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CheckpointPayload {
    pub state: TrainingState,
    pub metadata: Option<CheckpointMetadata>,
    /// Snapshot of the manager configuration active at save time.
    pub config: CheckpointConfig,
    /// Unix timestamp of the save.
    pub saved_at: i64,
}

pub(crate) fn payload_hash(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}
