//! Checkpoint listing against the on-disk history index

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tabled::Tabled;

use sentinel_lib::CheckpointMetadata;

use crate::output::{self, OutputFormat};

/// Name of the history index the checkpoint manager maintains
const HISTORY_FILE: &str = "checkpoint_history.json";

#[derive(Tabled, Serialize)]
struct CheckpointRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "STEP")]
    step: String,
    #[tabled(rename = "EPOCH")]
    epoch: String,
    #[tabled(rename = "LOSS")]
    loss: String,
    #[tabled(rename = "SIZE")]
    size: String,
    #[tabled(rename = "BEST")]
    best: String,
    #[tabled(rename = "CREATED")]
    created: String,
}

/// List checkpoints from the history index, falling back to a directory
/// scan when the index is missing.
pub fn list(dir: &str, format: OutputFormat) -> Result<()> {
    let dir = Path::new(dir);
    let index_path = dir.join(HISTORY_FILE);

    let rows = if index_path.exists() {
        let json = fs::read_to_string(&index_path)
            .with_context(|| format!("Failed to read {}", index_path.display()))?;
        let mut history: Vec<CheckpointMetadata> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse {}", index_path.display()))?;
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        history.iter().map(metadata_row).collect()
    } else {
        scan_rows(dir)?
    };

    output::print_table(&rows, format);
    Ok(())
}

fn metadata_row(meta: &CheckpointMetadata) -> CheckpointRow {
    CheckpointRow {
        id: meta.checkpoint_id.clone(),
        step: meta.step.to_string(),
        epoch: meta.epoch.to_string(),
        loss: format!("{:.4}", meta.loss),
        size: output::format_bytes(meta.size_bytes),
        best: if meta.is_best { "yes" } else { "" }.to_string(),
        created: meta.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

/// Best-effort rows from the raw files when no index exists.
fn scan_rows(dir: &Path) -> Result<Vec<CheckpointRow>> {
    let mut rows = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            output::print_warning(&format!("No checkpoint directory at {}", dir.display()));
            return Ok(rows);
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("ckpt") {
            continue;
        }
        let size = path.metadata().map(|m| m.len()).unwrap_or(0);
        let modified = path
            .metadata()
            .and_then(|m| m.modified())
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t))
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        rows.push(CheckpointRow {
            id: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            step: "-".to_string(),
            epoch: "-".to_string(),
            loss: "-".to_string(),
            size: output::format_bytes(size),
            best: String::new(),
            created: modified,
        });
    }

    rows.sort_by(|a, b| b.id.cmp(&a.id));
    Ok(rows)
}
