use adhoc_core::{CallProperties, ConnectionConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings read from the `--config` JSON file; command-line flags win
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub max_rows: usize,
    pub output_format: OutputFormat,
    pub connection: ConnectionConfig,
    /// Properties sent with every call
    pub properties: CallProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Csv,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            max_rows: 1000,
            output_format: OutputFormat::Table,
            connection: ConnectionConfig::default(),
            properties: CallProperties::default(),
        }
    }
}

impl CliConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: CliConfig = serde_json::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}
