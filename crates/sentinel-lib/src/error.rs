//! Typed errors for the checkpoint layer
//!
//! Structural and integrity failures are recoverable: the caller falls back
//! to an earlier checkpoint. I/O failures leave prior durable state exactly
//! as it was before the attempt.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Neither history nor the checkpoint directory holds anything loadable.
    #[error("no checkpoints available to load")]
    NoCheckpoints,

    /// The file is missing required sections or cannot be decoded.
    #[error("checkpoint {} failed structural validation: {reasons}", .path.display())]
    Structural { path: PathBuf, reasons: String },

    /// The stored integrity hash disagrees with the payload. The file is left
    /// in place; whether to discard or inspect it is a caller decision.
    #[error("checkpoint {} integrity hash mismatch - file may be corrupted", .path.display())]
    Integrity { path: PathBuf },

    #[error("checkpoint encoding failed: {0}")]
    Encode(#[from] bincode::Error),

    #[error("checkpoint I/O failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A background save task could not be joined at drain time.
    #[error("background save task failed: {0}")]
    Background(String),
}

impl CheckpointError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
