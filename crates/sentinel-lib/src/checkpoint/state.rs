//! Training state captured into checkpoints
//!
//! The checkpoint layer never inspects model internals: anything whose state
//! can be rendered to bytes and restored from them can be checkpointed.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Capability for components whose full state can be captured as bytes.
///
/// Implemented by models, optimizers, and schedulers that want to take part
/// in checkpointing. The encoding is owned entirely by the implementor.
pub trait Snapshot {
    /// Render the component's full state to bytes.
    fn snapshot(&self) -> Result<Vec<u8>>;

    /// Restore the component's state from bytes produced by [`Snapshot::snapshot`].
    fn restore(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Complete training state for checkpointing.
///
/// Ownership passes to the checkpoint manager at save time; the training
/// loop keeps working on its own live copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub step: u64,
    pub epoch: u64,

    /// Opaque model parameter state. A checkpoint without this is unusable.
    pub model_state: Vec<u8>,
    /// Opaque optimizer state. Resumable without it, just degraded.
    pub optimizer_state: Option<Vec<u8>>,
    pub scheduler_state: Option<Vec<u8>>,

    pub loss_history: Vec<f64>,
    pub validation_history: Vec<f64>,

    /// Named RNG streams captured for reproducible resumption.
    pub rng_states: HashMap<String, Vec<u8>>,

    /// Open-ended caller state; values are JSON-encoded strings by convention.
    pub custom_state: HashMap<String, String>,
}

impl TrainingState {
    pub fn new(step: u64, epoch: u64, model_state: Vec<u8>) -> Self {
        TrainingState {
            step,
            epoch,
            model_state,
            ..Default::default()
        }
    }

    /// Capture a state snapshot from live training components.
    pub fn capture(
        step: u64,
        epoch: u64,
        model: &dyn Snapshot,
        optimizer: Option<&dyn Snapshot>,
        scheduler: Option<&dyn Snapshot>,
    ) -> Result<Self> {
        Ok(TrainingState {
            step,
            epoch,
            model_state: model.snapshot()?,
            optimizer_state: optimizer.map(|o| o.snapshot()).transpose()?,
            scheduler_state: scheduler.map(|s| s.snapshot()).transpose()?,
            ..Default::default()
        })
    }

    /// Restore this state into live training components.
    ///
    /// Components for which the checkpoint holds no state are left untouched.
    pub fn restore_into(
        &self,
        model: &mut dyn Snapshot,
        optimizer: Option<&mut dyn Snapshot>,
        scheduler: Option<&mut dyn Snapshot>,
    ) -> Result<()> {
        model.restore(&self.model_state)?;
        if let (Some(target), Some(bytes)) = (optimizer, self.optimizer_state.as_deref()) {
            target.restore(bytes)?;
        }
        if let (Some(target), Some(bytes)) = (scheduler, self.scheduler_state.as_deref()) {
            target.restore(bytes)?;
        }
        Ok(())
    }
}
