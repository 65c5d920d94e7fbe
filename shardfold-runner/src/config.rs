//! Consolidation configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! data_root = "data"
//! datasets = ["kr-1m", "kr-1d", "us-5m"]
//! extension = "parquet"
//! monthly_wait_days = 5
//! compression = "zstd"
//! ledger = true
//! ```

use serde::{Deserialize, Serialize};
use shardfold_core::{Compression, DatasetKind, DEFAULT_WAIT_DAYS};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsolidationConfig {
    /// Directory holding one subdirectory per dataset (`KR-1m`, `KR-1d`, ...).
    pub data_root: PathBuf,
    pub datasets: Vec<DatasetKind>,
    /// Shard file extension, without the dot.
    pub extension: String,
    /// Days after a month closes before it may be consolidated.
    pub monthly_wait_days: u32,
    pub compression: Compression,
    /// Append one JSONL entry per committed or rolled-back job.
    pub ledger: bool,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            datasets: DatasetKind::ALL.to_vec(),
            extension: "parquet".to_string(),
            monthly_wait_days: DEFAULT_WAIT_DAYS,
            compression: Compression::default(),
            ledger: true,
        }
    }
}

impl ConsolidationConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extension.is_empty() || self.extension.starts_with('.') {
            return Err(ConfigError::Invalid(format!(
                "extension must be non-empty and without a leading dot, got '{}'",
                self.extension
            )));
        }
        if self.datasets.is_empty() {
            return Err(ConfigError::Invalid("datasets must not be empty".into()));
        }
        Ok(())
    }

    /// Root directory of one dataset.
    pub fn dataset_root(&self, kind: DatasetKind) -> PathBuf {
        self.data_root.join(kind.dir_name())
    }

    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = root.into();
        self
    }
}
