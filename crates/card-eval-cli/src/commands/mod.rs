//! Subcommand implementations.

pub mod chat;
pub mod corpus;
pub mod run;
pub mod stats;

use std::path::Path;

use anyhow::{Context, Result};
use card_eval::EvalConfig;

/// Load `path` as the base config, or start from defaults.
pub fn base_config(path: Option<&Path>) -> Result<EvalConfig> {
    match path {
        Some(path) => EvalConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(EvalConfig::default()),
    }
}

/// Read a system instruction file, trimmed.
pub fn read_instruction(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read system instruction {}", path.display()))?;
    Ok(text.trim().to_string())
}
