//! Checkpoint structural and integrity validation
//!
//! Inspects a checkpoint file for completeness without trusting it: a file
//! that decodes but fails its integrity hash is reported as untrustworthy
//! rather than merely incomplete.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::checkpoint::format::{self, CheckpointEnvelope, CheckpointPayload};

/// Result of validating one checkpoint file.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub size_bytes: u64,
    pub contains_model: bool,
    pub contains_optimizer: bool,
    pub contains_metadata: bool,
    /// True only when a stored hash was present and matched.
    pub hash_valid: bool,
    /// True only when a stored hash was present and disagreed.
    pub hash_mismatch: bool,
}

impl CheckpointValidation {
    fn new() -> Self {
        CheckpointValidation {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            size_bytes: 0,
            contains_model: false,
            contains_optimizer: false,
            contains_metadata: false,
            hash_valid: false,
            hash_mismatch: false,
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn finish(mut self) -> Self {
        self.is_valid = self.errors.is_empty();
        self
    }
}

/// Validates checkpoint files for integrity and completeness.
#[derive(Debug, Clone, Default)]
pub struct CheckpointValidator;

impl CheckpointValidator {
    pub fn new() -> Self {
        CheckpointValidator
    }

    /// Validate a checkpoint file without mutating anything.
    pub fn validate(&self, path: &Path) -> CheckpointValidation {
        let mut report = CheckpointValidation::new();

        if !path.exists() {
            report.error("Checkpoint file does not exist");
            return report.finish();
        }

        report.size_bytes = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if report.size_bytes == 0 {
            report.error("Checkpoint file is empty");
            return report.finish();
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                report.error(format!("Failed to read checkpoint: {e}"));
                return report.finish();
            }
        };

        let envelope: CheckpointEnvelope = match bincode::deserialize(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                report.error(format!("Failed to decode checkpoint envelope: {e}"));
                return report.finish();
            }
        };

        // Verify the hash over the payload bytes before trusting their contents.
        let computed = format::payload_hash(&envelope.payload);
        if computed == envelope.payload_sha256 {
            report.hash_valid = true;
        } else {
            report.hash_mismatch = true;
            report.error("Checkpoint hash mismatch - file may be corrupted");
        }

        let payload: CheckpointPayload = match bincode::deserialize(&envelope.payload) {
            Ok(payload) => payload,
            Err(e) => {
                report.error(format!("Failed to decode checkpoint payload: {e}"));
                return report.finish();
            }
        };

        if payload.state.model_state.is_empty() {
            report.error("Missing model parameter state");
        } else {
            report.contains_model = true;
        }

        if payload.state.optimizer_state.is_some() {
            report.contains_optimizer = true;
        } else {
            report.warning("Missing optimizer state");
        }

        if payload.metadata.is_some() {
            report.contains_metadata = true;
        } else {
            report.warning("Missing checkpoint metadata");
        }

        report.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::manager::CheckpointConfig;
    use crate::checkpoint::metadata::CheckpointMetadata;
    use crate::checkpoint::state::TrainingState;
    use chrono::Utc;
    use std::collections::HashMap;

    fn test_metadata() -> CheckpointMetadata {
        CheckpointMetadata {
            checkpoint_id: "checkpoint_epoch_0001_step_00000100_20240101_000000000".to_string(),
            created_at: Utc::now(),
            step: 100,
            epoch: 1,
            loss: 0.5,
            learning_rate: 1e-4,
            metric_snapshot: HashMap::new(),
            process_memory_bytes: None,
            size_bytes: 0,
            is_best: false,
            is_corrupted: false,
            custom: HashMap::new(),
        }
    }

    fn write_checkpoint_file(
        path: &Path,
        state: TrainingState,
        metadata: Option<CheckpointMetadata>,
    ) {
        let payload = CheckpointPayload {
            state,
            metadata,
            config: CheckpointConfig::default(),
            saved_at: Utc::now().timestamp(),
        };
        let payload_bytes = bincode::serialize(&payload).unwrap();
        let envelope = CheckpointEnvelope {
            payload_sha256: format::payload_hash(&payload_bytes),
            payload: payload_bytes,
        };
        fs::write(path, bincode::serialize(&envelope).unwrap()).unwrap();
    }

    #[test]
    fn test_nonexistent_file() {
        let validator = CheckpointValidator::new();
        let report = validator.validate(Path::new("/nonexistent/ckpt"));
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("does not exist"));
    }

    #[test]
    fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.ckpt");
        fs::write(&path, b"").unwrap();

        let report = CheckpointValidator::new().validate(&path);
        assert!(!report.is_valid);
        assert_eq!(report.size_bytes, 0);
        assert!(report.errors[0].contains("empty"));
    }

    #[test]
    fn test_valid_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("good.ckpt");
        let mut state = TrainingState::new(100, 1, vec![1, 2, 3, 4]);
        state.optimizer_state = Some(vec![5, 6]);
        write_checkpoint_file(&path, state, Some(test_metadata()));

        let report = CheckpointValidator::new().validate(&path);
        assert!(report.is_valid, "errors: {:?}", report.errors);
        assert!(report.contains_model);
        assert!(report.contains_optimizer);
        assert!(report.contains_metadata);
        assert!(report.hash_valid);
        assert!(report.size_bytes > 0);
    }

    #[test]
    fn test_missing_optimizer_is_warning_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_opt.ckpt");
        write_checkpoint_file(&path, TrainingState::new(10, 0, vec![1]), Some(test_metadata()));

        let report = CheckpointValidator::new().validate(&path);
        assert!(report.is_valid);
        assert!(!report.contains_optimizer);
        assert!(report.warnings.iter().any(|w| w.contains("optimizer")));
    }

    #[test]
    fn test_missing_model_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_model.ckpt");
        write_checkpoint_file(&path, TrainingState::new(10, 0, vec![]), Some(test_metadata()));

        let report = CheckpointValidator::new().validate(&path);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("model")));
    }

    #[test]
    fn test_missing_metadata_is_warning_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_meta.ckpt");
        write_checkpoint_file(&path, TrainingState::new(10, 0, vec![1]), None);

        let report = CheckpointValidator::new().validate(&path);
        assert!(report.is_valid);
        assert!(!report.contains_metadata);
        assert!(report.warnings.iter().any(|w| w.contains("metadata")));
    }

    #[test]
    fn test_corrupted_trailing_byte_fails_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.ckpt");
        write_checkpoint_file(
            &path,
            TrainingState::new(10, 0, vec![0xFF; 64]),
            Some(test_metadata()),
        );

        // The payload is the last field of the envelope, so the file's final
        // byte sits inside the hashed region.
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let report = CheckpointValidator::new().validate(&path);
        assert!(!report.is_valid);
        assert!(report.hash_mismatch);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("hash mismatch")));
    }
}
