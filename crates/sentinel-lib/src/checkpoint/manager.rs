//! Checkpoint lifecycle management
//!
//! Decides when to save, writes checkpoints atomically (temp file, validate,
//! rename), loads and retires them, and keeps a durable history index so a
//! crash loses at most the checkpoint currently in flight.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::checkpoint::format::{self, CheckpointEnvelope, CheckpointPayload};
use crate::checkpoint::metadata::CheckpointMetadata;
use crate::checkpoint::state::TrainingState;
use crate::checkpoint::validator::CheckpointValidator;
use crate::error::CheckpointError;
use crate::models::MetricDirection;
use crate::observability::SentinelMetrics;

/// File extension for checkpoint files
const CHECKPOINT_EXT: &str = "ckpt";

/// Name of the durable history index beside the checkpoint files
const HISTORY_FILE: &str = "checkpoint_history.json";

/// Configuration for checkpoint behavior, set once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub checkpoint_dir: PathBuf,

    /// Save every N steps; 0 disables the step trigger
    pub save_every_steps: u64,
    /// Save once per epoch crossing when the epoch is a multiple of N; 0 disables
    pub save_every_epochs: u64,
    /// Save when this many minutes passed since the last successful save; 0 disables
    pub save_every_minutes: u64,

    /// Retention: most recent N checkpoints always kept
    pub keep_last_n: usize,
    /// Retention: most recent N best-flagged checkpoints kept
    pub keep_best_n: usize,
    /// Retention: checkpoints at epoch multiples of N kept; 0 disables
    pub keep_every_n_epochs: u64,

    pub atomic_saves: bool,
    pub validate_on_save: bool,

    pub async_saves: bool,
    pub max_concurrent_saves: usize,

    pub best_metric: String,
    pub best_metric_direction: MetricDirection,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig {
            checkpoint_dir: PathBuf::from("checkpoints"),
            save_every_steps: 1000,
            save_every_epochs: 1,
            save_every_minutes: 30,
            keep_last_n: 5,
            keep_best_n: 3,
            keep_every_n_epochs: 10,
            atomic_saves: true,
            validate_on_save: true,
            async_saves: true,
            max_concurrent_saves: 2,
            best_metric: "validation_loss".to_string(),
            best_metric_direction: MetricDirection::Minimize,
        }
    }
}

/// Manages saving, loading, listing, and retiring checkpoints.
///
/// The in-memory history is the source of truth; the directory is reconciled
/// against it during retention cleanup, and the history index file makes it
/// survive restarts.
pub struct CheckpointManager {
    shared: Arc<ManagerShared>,
    save_permits: Arc<Semaphore>,
    pending: Mutex<Vec<JoinHandle<Result<(), CheckpointError>>>>,
}

/// State reachable from background save tasks.
struct ManagerShared {
    config: CheckpointConfig,
    validator: CheckpointValidator,
    metrics: SentinelMetrics,
    /// Serializes the temp-write -> validate -> rename -> history-append
    /// sequence across concurrent saves.
    write_gate: Mutex<()>,
    history: Mutex<Vec<CheckpointMetadata>>,
    best_metrics: Mutex<HashMap<String, f64>>,
    /// Completion instant of the last successful save.
    last_save: Mutex<Instant>,
    /// Last epoch number for which an epoch-triggered save fired.
    epoch_fired: Mutex<Option<u64>>,
}

impl CheckpointManager {
    pub fn new(config: CheckpointConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.checkpoint_dir)
            .map_err(|e| CheckpointError::io(&config.checkpoint_dir, e))?;

        let max_saves = config.max_concurrent_saves.max(1);
        let shared = Arc::new(ManagerShared {
            config,
            validator: CheckpointValidator::new(),
            metrics: SentinelMetrics::new(),
            write_gate: Mutex::new(()),
            history: Mutex::new(Vec::new()),
            best_metrics: Mutex::new(HashMap::new()),
            last_save: Mutex::new(Instant::now()),
            epoch_fired: Mutex::new(None),
        });
        shared.load_history();

        info!(
            checkpoint_dir = %shared.config.checkpoint_dir.display(),
            known_checkpoints = shared.history.lock().unwrap().len(),
            "Checkpoint manager initialized"
        );

        Ok(CheckpointManager {
            shared,
            save_permits: Arc::new(Semaphore::new(max_saves)),
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Whether a checkpoint should be saved at this step/epoch.
    ///
    /// Never true at step 0. Epoch-triggered saves are idempotent per epoch
    /// number: an epoch fires at most once no matter how often it is polled
    /// or replayed after resumption.
    pub fn should_save(&self, step: u64, epoch: u64) -> bool {
        if step == 0 {
            return false;
        }

        let config = &self.shared.config;

        if config.save_every_steps > 0 && step % config.save_every_steps == 0 {
            return true;
        }

        if config.save_every_epochs > 0 && epoch > 0 && epoch % config.save_every_epochs == 0 {
            let mut fired = self.shared.epoch_fired.lock().unwrap();
            if *fired != Some(epoch) {
                *fired = Some(epoch);
                return true;
            }
        }

        if config.save_every_minutes > 0 {
            let elapsed = self.shared.last_save.lock().unwrap().elapsed();
            if elapsed >= Duration::from_secs(config.save_every_minutes * 60) {
                return true;
            }
        }

        false
    }

    /// Save a training checkpoint, returning its ID.
    ///
    /// With `async_saves` the write is offloaded to a bounded blocking worker
    /// and the ID is returned while the save may still be pending; call
    /// [`CheckpointManager::drain`] at shutdown so no save is silently lost.
    pub async fn save_checkpoint(
        &self,
        state: TrainingState,
        metrics: &HashMap<String, f64>,
        is_best: bool,
        custom: HashMap<String, String>,
    ) -> Result<String, CheckpointError> {
        let checkpoint_id = generate_checkpoint_id(state.epoch, state.step);
        let metadata = self
            .shared
            .build_metadata(&checkpoint_id, &state, metrics, is_best, custom);

        if self.shared.config.async_saves {
            // Reap finished handles so the pending list stays bounded.
            self.pending.lock().unwrap().retain(|h| !h.is_finished());

            let permit = self
                .save_permits
                .clone()
                .acquire_owned()
                .await
                .expect("save semaphore closed");
            let shared = Arc::clone(&self.shared);
            let id = checkpoint_id.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                shared.save_checkpoint_sync(&id, state, metadata)
            });
            self.pending.lock().unwrap().push(handle);
            debug!(checkpoint_id = %checkpoint_id, "Checkpoint save scheduled");
        } else {
            self.shared
                .save_checkpoint_sync(&checkpoint_id, state, metadata)?;
        }

        Ok(checkpoint_id)
    }

    /// Wait for all in-flight saves, surfacing the first error encountered.
    pub async fn drain(&self) -> Result<(), CheckpointError> {
        let handles: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Checkpoint save task failed to join");
                    if first_error.is_none() {
                        first_error = Some(CheckpointError::Background(e.to_string()));
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Load a checkpoint by ID, or the most recent one when `None`.
    ///
    /// The target is validated before deserializing; failure returns a typed
    /// error without mutating history.
    pub fn load_checkpoint(
        &self,
        checkpoint_id: Option<&str>,
    ) -> Result<TrainingState, CheckpointError> {
        let id = match checkpoint_id {
            Some(id) => id.to_string(),
            None => self
                .latest_checkpoint_id()
                .ok_or(CheckpointError::NoCheckpoints)?,
        };
        let path = self.shared.checkpoint_path(&id);

        let report = self.shared.validator.validate(&path);
        if !report.is_valid {
            if report.hash_mismatch {
                return Err(CheckpointError::Integrity { path });
            }
            return Err(CheckpointError::Structural {
                path,
                reasons: report.errors.join("; "),
            });
        }

        let state = read_state(&path)?;
        info!(
            checkpoint_id = %id,
            step = state.step,
            epoch = state.epoch,
            "Checkpoint loaded, resuming"
        );
        Ok(state)
    }

    /// ID of the most recent checkpoint: newest in history, falling back to
    /// a directory scan by modification time on a fresh start.
    pub fn latest_checkpoint_id(&self) -> Option<String> {
        {
            let history = self.shared.history.lock().unwrap();
            if let Some(latest) = history
                .iter()
                .max_by(|a, b| creation_order(a).cmp(&creation_order(b)))
            {
                return Some(latest.checkpoint_id.clone());
            }
        }
        self.shared.scan_latest_on_disk()
    }

    /// ID of the best checkpoint for the given metric (defaults to the
    /// configured best metric), honoring its direction.
    pub fn best_checkpoint_id(&self, metric: Option<&str>) -> Option<String> {
        let config = &self.shared.config;
        let metric = metric.unwrap_or(&config.best_metric);
        let direction = config.best_metric_direction;

        let history = self.shared.history.lock().unwrap();
        history
            .iter()
            .filter(|c| c.is_best)
            .map(|c| {
                let value = c
                    .metric_snapshot
                    .get(metric)
                    .copied()
                    .unwrap_or_else(|| direction.worst());
                (c, value)
            })
            .reduce(|best, candidate| {
                if direction.better(candidate.1, best.1) {
                    candidate
                } else {
                    best
                }
            })
            .map(|(c, _)| c.checkpoint_id.clone())
    }

    /// All known checkpoints, newest first.
    pub fn list_checkpoints(&self) -> Vec<CheckpointMetadata> {
        let mut history = self.shared.history.lock().unwrap().clone();
        history.sort_by(|a, b| creation_order(b).cmp(&creation_order(a)));
        history
    }

    /// Delete a specific checkpoint from disk and history.
    pub fn delete_checkpoint(&self, checkpoint_id: &str) -> bool {
        let _gate = self.shared.write_gate.lock().unwrap();
        let deleted = self.shared.delete_checkpoint_inner(checkpoint_id);
        self.shared.persist_history();
        deleted
    }
}

impl ManagerShared {
    fn checkpoint_path(&self, checkpoint_id: &str) -> PathBuf {
        self.config
            .checkpoint_dir
            .join(format!("{checkpoint_id}.{CHECKPOINT_EXT}"))
    }

    fn build_metadata(
        &self,
        checkpoint_id: &str,
        state: &TrainingState,
        metrics: &HashMap<String, f64>,
        is_best: bool,
        custom: HashMap<String, String>,
    ) -> CheckpointMetadata {
        CheckpointMetadata {
            checkpoint_id: checkpoint_id.to_string(),
            created_at: Utc::now(),
            step: state.step,
            epoch: state.epoch,
            loss: metrics.get("loss").copied().unwrap_or(0.0),
            learning_rate: metrics.get("learning_rate").copied().unwrap_or(0.0),
            metric_snapshot: metrics.clone(),
            process_memory_bytes: process_rss_bytes(),
            size_bytes: 0,
            is_best,
            is_corrupted: false,
            custom,
        }
    }

    fn save_checkpoint_sync(
        &self,
        checkpoint_id: &str,
        state: TrainingState,
        metadata: CheckpointMetadata,
    ) -> Result<(), CheckpointError> {
        let started = Instant::now();
        let result = self.write_checkpoint(checkpoint_id, state, metadata);
        match &result {
            Ok(()) => {
                self.metrics.observe_save_duration(started.elapsed().as_secs_f64());
                self.metrics.inc_checkpoints_saved();
                *self.last_save.lock().unwrap() = Instant::now();
                info!(
                    checkpoint_id = %checkpoint_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Checkpoint saved"
                );
            }
            Err(e) => {
                self.metrics.inc_checkpoint_save_failures();
                error!(checkpoint_id = %checkpoint_id, error = %e, "Checkpoint save failed");
            }
        }
        result
    }

    /// The atomic save sequence. Holding the write gate for its whole
    /// duration means two concurrent saves can never race on a destination
    /// path or corrupt the shared history.
    fn write_checkpoint(
        &self,
        checkpoint_id: &str,
        state: TrainingState,
        mut metadata: CheckpointMetadata,
    ) -> Result<(), CheckpointError> {
        let _gate = self.write_gate.lock().unwrap();

        let final_path = self.checkpoint_path(checkpoint_id);
        let tmp_path = final_path.with_extension(format!("{CHECKPOINT_EXT}.tmp"));

        let payload = CheckpointPayload {
            state,
            metadata: Some(metadata.clone()),
            config: self.config.clone(),
            saved_at: Utc::now().timestamp(),
        };
        let payload_bytes = bincode::serialize(&payload)?;
        let envelope = CheckpointEnvelope {
            payload_sha256: format::payload_hash(&payload_bytes),
            payload: payload_bytes,
        };
        let bytes = bincode::serialize(&envelope)?;

        let write_result = if self.config.atomic_saves {
            self.write_atomic(&tmp_path, &final_path, &bytes)
        } else {
            fs::write(&final_path, &bytes).map_err(|e| CheckpointError::io(&final_path, e))
        };
        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        metadata.size_bytes = fs::metadata(&final_path).map(|m| m.len()).unwrap_or(0);

        self.history.lock().unwrap().push(metadata.clone());

        if metadata.is_best {
            if let Some(value) = metadata.metric_snapshot.get(&self.config.best_metric) {
                self.best_metrics
                    .lock()
                    .unwrap()
                    .insert(self.config.best_metric.clone(), *value);
            }
        }

        self.cleanup_old_checkpoints();
        self.persist_history();
        self.metrics
            .set_checkpoints_retained(self.history.lock().unwrap().len() as i64);

        Ok(())
    }

    /// Write to a temp file beside the target, fsync, validate, then rename.
    /// The rename is the only step that makes the checkpoint observable.
    fn write_atomic(
        &self,
        tmp_path: &Path,
        final_path: &Path,
        bytes: &[u8],
    ) -> Result<(), CheckpointError> {
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(tmp_path)
                .map_err(|e| CheckpointError::io(tmp_path, e))?;
            file.write_all(bytes)
                .map_err(|e| CheckpointError::io(tmp_path, e))?;
            file.sync_all()
                .map_err(|e| CheckpointError::io(tmp_path, e))?;
        }

        if self.config.validate_on_save {
            let report = self.validator.validate(tmp_path);
            if !report.is_valid {
                let _ = fs::remove_file(tmp_path);
                return Err(CheckpointError::Structural {
                    path: final_path.to_path_buf(),
                    reasons: report.errors.join("; "),
                });
            }
        }

        fs::rename(tmp_path, final_path).map_err(|e| CheckpointError::io(final_path, e))
    }

    /// Retire checkpoints outside the keep-set: most recent N, most recent N
    /// best-flagged, and every epoch multiple of the keep-every-K setting.
    /// Per-file deletion failures are logged and skipped.
    fn cleanup_old_checkpoints(&self) {
        let mut snapshot = self.history.lock().unwrap().clone();
        snapshot.sort_by(|a, b| creation_order(b).cmp(&creation_order(a)));

        let mut keep: HashSet<String> = HashSet::new();

        if self.config.keep_last_n > 0 {
            keep.extend(
                snapshot
                    .iter()
                    .take(self.config.keep_last_n)
                    .map(|c| c.checkpoint_id.clone()),
            );
        }

        if self.config.keep_best_n > 0 {
            keep.extend(
                snapshot
                    .iter()
                    .filter(|c| c.is_best)
                    .take(self.config.keep_best_n)
                    .map(|c| c.checkpoint_id.clone()),
            );
        }

        if self.config.keep_every_n_epochs > 0 {
            keep.extend(
                snapshot
                    .iter()
                    .filter(|c| c.epoch % self.config.keep_every_n_epochs == 0)
                    .map(|c| c.checkpoint_id.clone()),
            );
        }

        for checkpoint in snapshot.iter().filter(|c| !keep.contains(&c.checkpoint_id)) {
            self.delete_checkpoint_inner(&checkpoint.checkpoint_id);
        }
    }

    fn delete_checkpoint_inner(&self, checkpoint_id: &str) -> bool {
        let path = self.checkpoint_path(checkpoint_id);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!(
                    checkpoint_id = %checkpoint_id,
                    error = %e,
                    "Failed to delete checkpoint file, skipping"
                );
            }
        }
        let mut history = self.history.lock().unwrap();
        let before = history.len();
        history.retain(|c| c.checkpoint_id != checkpoint_id);
        if history.len() < before {
            debug!(checkpoint_id = %checkpoint_id, "Checkpoint retired");
            true
        } else {
            false
        }
    }

    /// Persist the history index atomically so a crash loses at most the
    /// checkpoint in flight. Failure degrades to a log line.
    fn persist_history(&self) {
        let history = self.history.lock().unwrap().clone();
        let index_path = self.config.checkpoint_dir.join(HISTORY_FILE);
        let tmp_path = index_path.with_extension("json.tmp");

        let result = serde_json::to_vec_pretty(&history)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            .and_then(|json| fs::write(&tmp_path, json))
            .and_then(|_| fs::rename(&tmp_path, &index_path));

        if let Err(e) = result {
            error!(error = %e, "Failed to persist checkpoint history index");
        }
    }

    fn load_history(&self) {
        let index_path = self.config.checkpoint_dir.join(HISTORY_FILE);
        if !index_path.exists() {
            return;
        }
        match fs::read_to_string(&index_path)
            .map_err(anyhow::Error::from)
            .and_then(|json| Ok(serde_json::from_str::<Vec<CheckpointMetadata>>(&json)?))
        {
            Ok(loaded) => {
                info!(count = loaded.len(), "Loaded checkpoint history index");
                *self.history.lock().unwrap() = loaded;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load checkpoint history index, starting fresh");
            }
        }
    }

    /// Directory scan fallback for the first run after a restart with no
    /// usable history index.
    fn scan_latest_on_disk(&self) -> Option<String> {
        let entries = fs::read_dir(&self.config.checkpoint_dir).ok()?;
        entries
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if path.extension()?.to_str()? != CHECKPOINT_EXT {
                    return None;
                }
                let modified = path.metadata().ok()?.modified().ok()?;
                Some((modified, path))
            })
            .max_by_key(|(modified, _)| *modified)
            .and_then(|(_, path)| Some(path.file_stem()?.to_string_lossy().into_owned()))
    }
}

/// Sort key giving chronological creation order with the ID as tiebreak for
/// saves landing in the same millisecond.
fn creation_order(meta: &CheckpointMetadata) -> (chrono::DateTime<Utc>, &str) {
    (meta.created_at, meta.checkpoint_id.as_str())
}

/// Checkpoint IDs encode epoch, step, and a millisecond timestamp, which
/// makes them unique and sortable by creation order within a run.
fn generate_checkpoint_id(epoch: u64, step: u64) -> String {
    format!(
        "checkpoint_epoch_{:04}_step_{:08}_{}",
        epoch,
        step,
        Utc::now().format("%Y%m%d_%H%M%S%3f")
    )
}

fn read_state(path: &Path) -> Result<TrainingState, CheckpointError> {
    let bytes = fs::read(path).map_err(|e| CheckpointError::io(path, e))?;
    let envelope: CheckpointEnvelope = bincode::deserialize(&bytes)?;
    let payload: CheckpointPayload = bincode::deserialize(&envelope.payload)?;
    Ok(payload.state)
}

#[cfg(target_os = "linux")]
fn process_rss_bytes() -> Option<u64> {
    let statm = fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(rss_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn process_rss_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_config(dir: &Path) -> CheckpointConfig {
        CheckpointConfig {
            checkpoint_dir: dir.to_path_buf(),
            save_every_steps: 100,
            save_every_epochs: 1,
            save_every_minutes: 0,
            keep_last_n: 5,
            keep_best_n: 3,
            keep_every_n_epochs: 0,
            async_saves: false,
            ..Default::default()
        }
    }

    fn test_state(step: u64, epoch: u64) -> TrainingState {
        let mut state = TrainingState::new(step, epoch, vec![0xA5; 128]);
        state.optimizer_state = Some(vec![0x5A; 64]);
        state.loss_history = vec![2.0, 1.8, 1.5];
        state.rng_states.insert("global".to_string(), vec![7; 8]);
        state
    }

    fn test_metrics(loss: f64) -> HashMap<String, f64> {
        let mut metrics = HashMap::new();
        metrics.insert("loss".to_string(), loss);
        metrics.insert("validation_loss".to_string(), loss + 0.1);
        metrics
    }

    #[test]
    fn test_should_save_never_at_step_zero() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(sync_config(dir.path())).unwrap();
        assert!(!manager.should_save(0, 0));
        assert!(!manager.should_save(0, 5));
    }

    #[test]
    fn test_should_save_step_interval() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(sync_config(dir.path())).unwrap();
        assert!(manager.should_save(100, 0));
        assert!(manager.should_save(200, 0));
        assert!(!manager.should_save(150, 0));
        assert!(!manager.should_save(1, 0));
    }

    #[test]
    fn test_epoch_trigger_fires_once_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sync_config(dir.path());
        config.save_every_steps = 0;
        let manager = CheckpointManager::new(config).unwrap();

        assert!(manager.should_save(50, 1));
        // Polled again inside the same epoch: already fired.
        assert!(!manager.should_save(51, 1));
        assert!(manager.should_save(90, 2));
        // Replaying the same epoch after a resume does not fire again.
        assert!(!manager.should_save(95, 2));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(sync_config(dir.path())).unwrap();
        let state = test_state(100, 1);

        let id = manager
            .save_checkpoint(state.clone(), &test_metrics(0.5), false, HashMap::new())
            .await
            .unwrap();

        let loaded = manager.load_checkpoint(Some(&id)).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.step, 100);
        assert_eq!(loaded.epoch, 1);
        assert_eq!(loaded.model_state, state.model_state);
        assert_eq!(loaded.optimizer_state, state.optimizer_state);
    }

    #[tokio::test]
    async fn test_load_latest_without_id() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(sync_config(dir.path())).unwrap();

        for step in [100, 200, 300] {
            manager
                .save_checkpoint(test_state(step, 0), &test_metrics(1.0), false, HashMap::new())
                .await
                .unwrap();
        }

        let loaded = manager.load_checkpoint(None).unwrap();
        assert_eq!(loaded.step, 300);
    }

    #[test]
    fn test_load_with_no_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(sync_config(dir.path())).unwrap();
        let err = manager.load_checkpoint(None).unwrap_err();
        assert!(matches!(err, CheckpointError::NoCheckpoints));
    }

    #[tokio::test]
    async fn test_retention_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sync_config(dir.path());
        config.keep_last_n = 2;
        config.keep_best_n = 0;
        let manager = CheckpointManager::new(config).unwrap();

        // Epochs chosen so no keep-every-K multiple applies (it is disabled).
        for step in [100, 200, 300, 400, 500] {
            manager
                .save_checkpoint(test_state(step, 1), &test_metrics(1.0), false, HashMap::new())
                .await
                .unwrap();
        }

        let remaining = manager.list_checkpoints();
        assert_eq!(remaining.len(), 2);
        let steps: Vec<u64> = remaining.iter().map(|c| c.step).collect();
        assert!(steps.contains(&400));
        assert!(steps.contains(&500));

        let on_disk = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .map(|ext| ext == CHECKPOINT_EXT)
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(on_disk, 2);
    }

    #[tokio::test]
    async fn test_retention_keeps_best() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sync_config(dir.path());
        config.keep_last_n = 1;
        config.keep_best_n = 1;
        let manager = CheckpointManager::new(config).unwrap();

        let best_id = manager
            .save_checkpoint(test_state(100, 1), &test_metrics(0.2), true, HashMap::new())
            .await
            .unwrap();
        for step in [200, 300, 400] {
            manager
                .save_checkpoint(test_state(step, 1), &test_metrics(1.0), false, HashMap::new())
                .await
                .unwrap();
        }

        let ids: Vec<String> = manager
            .list_checkpoints()
            .iter()
            .map(|c| c.checkpoint_id.clone())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&best_id));
    }

    #[tokio::test]
    async fn test_corrupted_checkpoint_yields_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(sync_config(dir.path())).unwrap();

        let id = manager
            .save_checkpoint(test_state(100, 1), &test_metrics(0.5), false, HashMap::new())
            .await
            .unwrap();

        let path = dir.path().join(format!("{id}.{CHECKPOINT_EXT}"));
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let err = manager.load_checkpoint(Some(&id)).unwrap_err();
        assert!(matches!(err, CheckpointError::Integrity { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn test_async_saves_complete_on_drain() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sync_config(dir.path());
        config.async_saves = true;
        config.max_concurrent_saves = 2;
        let manager = CheckpointManager::new(config).unwrap();

        let mut ids = Vec::new();
        for step in [100, 200, 300] {
            let id = manager
                .save_checkpoint(test_state(step, 1), &test_metrics(1.0), false, HashMap::new())
                .await
                .unwrap();
            ids.push(id);
        }
        manager.drain().await.unwrap();

        for id in &ids {
            let path = dir.path().join(format!("{id}.{CHECKPOINT_EXT}"));
            assert!(path.exists(), "missing {id}");
        }
        assert_eq!(manager.list_checkpoints().len(), 3);
    }

    #[tokio::test]
    async fn test_history_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let manager = CheckpointManager::new(sync_config(dir.path())).unwrap();
            manager
                .save_checkpoint(test_state(100, 1), &test_metrics(0.5), false, HashMap::new())
                .await
                .unwrap()
        };

        // Fresh manager over the same directory resumes from the index.
        let manager = CheckpointManager::new(sync_config(dir.path())).unwrap();
        assert_eq!(manager.latest_checkpoint_id(), Some(id));
        assert_eq!(manager.list_checkpoints().len(), 1);
    }

    #[tokio::test]
    async fn test_best_checkpoint_id_honors_direction() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sync_config(dir.path());
        config.keep_last_n = 10;
        let manager = CheckpointManager::new(config).unwrap();

        let id_worse = manager
            .save_checkpoint(test_state(100, 1), &test_metrics(0.9), true, HashMap::new())
            .await
            .unwrap();
        let id_better = manager
            .save_checkpoint(test_state(200, 1), &test_metrics(0.3), true, HashMap::new())
            .await
            .unwrap();

        let best = manager.best_checkpoint_id(None).unwrap();
        assert_eq!(best, id_better);
        assert_ne!(best, id_worse);
    }

    #[test]
    fn test_manager_requires_usable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sync_config(dir.path());
        // Point the directory at a regular file: construction fails up front.
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"x").unwrap();
        config.checkpoint_dir = blocked;
        assert!(CheckpointManager::new(config).is_err());
    }

    #[tokio::test]
    async fn test_failed_save_propagates_and_leaves_history_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(sync_config(dir.path())).unwrap();
        // Pull the directory out from under the manager so the temp write fails.
        fs::remove_dir_all(dir.path()).unwrap();

        let result = manager
            .save_checkpoint(test_state(100, 1), &test_metrics(1.0), false, HashMap::new())
            .await;
        assert!(result.is_err());
        assert!(manager.list_checkpoints().is_empty());
    }
}
