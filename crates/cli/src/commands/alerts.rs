//! Alert log inspection

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tabled::Tabled;

use sentinel_lib::AnomalyAlert;

use crate::output::{self, OutputFormat};

#[derive(Tabled, Serialize)]
struct AlertRow {
    #[tabled(rename = "TIME")]
    time: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "SEVERITY")]
    severity: String,
    #[tabled(rename = "STEP")]
    step: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

/// Show alerts from the append-only log, newest first.
pub fn show(log: &str, since_hours: i64, format: OutputFormat) -> Result<()> {
    let path = Path::new(log);
    if !path.exists() {
        output::print_warning(&format!("No alert log at {}", path.display()));
        return Ok(());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let cutoff = Utc::now() - chrono::Duration::hours(since_hours);
    let mut skipped = 0usize;
    let mut alerts: Vec<AnomalyAlert> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(alert) => Some(alert),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .filter(|alert: &AnomalyAlert| alert.timestamp >= cutoff)
        .collect();
    alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    if skipped > 0 {
        output::print_warning(&format!("Skipped {skipped} unparseable log lines"));
    }

    let rows: Vec<AlertRow> = alerts
        .iter()
        .map(|alert| AlertRow {
            time: alert.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            kind: alert.kind.to_string(),
            severity: output::color_severity(&alert.severity.to_string()),
            step: alert.step.to_string(),
            description: alert.description.clone(),
        })
        .collect();

    output::print_table(&rows, format);
    Ok(())
}
