//! CLI configuration

use anyhow::Result;
use serde::Deserialize;

/// CLI configuration, overridable via SENTINEL_* environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    /// Directory holding checkpoint files and the history index
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    /// Append-only anomaly alert log
    #[serde(default = "default_alert_log")]
    pub alert_log: String,
}

fn default_checkpoint_dir() -> String {
    "checkpoints".to_string()
}

fn default_alert_log() -> String {
    "alerts/alerts.jsonl".to_string()
}

impl CliConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SENTINEL"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| CliConfig {
            checkpoint_dir: default_checkpoint_dir(),
            alert_log: default_alert_log(),
        }))
    }
}
