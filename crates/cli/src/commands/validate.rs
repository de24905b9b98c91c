//! Checkpoint validation command

use std::path::Path;

use anyhow::{bail, Result};

use sentinel_lib::CheckpointValidator;

use crate::output::{self, OutputFormat};

/// Validate a checkpoint file and report the findings. Exits non-zero when
/// the checkpoint is invalid so scripts can gate on the result.
pub fn run(path: &str, format: OutputFormat) -> Result<()> {
    let validator = CheckpointValidator::new();
    let report = validator.validate(Path::new(path));

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            println!("checkpoint: {path}");
            println!("size:       {}", output::format_bytes(report.size_bytes));
            println!(
                "contents:   model={} optimizer={} metadata={}",
                report.contains_model, report.contains_optimizer, report.contains_metadata
            );
            println!("hash:       {}", if report.hash_valid { "ok" } else { "not verified" });

            for warning in &report.warnings {
                output::print_warning(warning);
            }
            for error in &report.errors {
                output::print_error(error);
            }
            if report.is_valid {
                output::print_success("Checkpoint is valid");
            }
        }
    }

    if !report.is_valid {
        bail!("checkpoint failed validation");
    }
    Ok(())
}
