//! Environment checks run once before any orchestrator is built.

use crate::config::{ConfigError, ConsolidationConfig};
use shardfold_core::DatasetKind;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("data root {} does not exist", .0.display())]
    DataRootMissing(PathBuf),
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("cannot access {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// What preflight found.
#[derive(Debug, Clone, Default)]
pub struct Preflight {
    /// Configured datasets whose root directory exists.
    pub present: Vec<DatasetKind>,
    /// Configured datasets with no root directory. Not an error.
    pub missing: Vec<DatasetKind>,
    /// Candidates left by an interrupted run. The next job on that window
    /// overwrites them.
    pub stale_candidates: Vec<PathBuf>,
}

/// Check the config and the data root before constructing an orchestrator.
pub fn check(config: &ConsolidationConfig) -> Result<Preflight, PreflightError> {
    config.validate()?;
    require_dir(&config.data_root, true)?;

    let mut report = Preflight::default();
    for &kind in &config.datasets {
        let root = config.dataset_root(kind);
        if !root.exists() {
            warn!(dataset = %kind, "data directory not found: {}", root.display());
            report.missing.push(kind);
            continue;
        }
        require_dir(&root, false)?;
        report.stale_candidates.extend(stale_candidates(&root)?);
        report.present.push(kind);
    }

    for path in &report.stale_candidates {
        warn!("stale candidate from an interrupted run: {}", path.display());
    }
    info!(
        present = report.present.len(),
        missing = report.missing.len(),
        "preflight passed for {}",
        config.data_root.display()
    );
    Ok(report)
}

fn require_dir(path: &Path, is_data_root: bool) -> Result<(), PreflightError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(PreflightError::NotADirectory(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && is_data_root => {
            Err(PreflightError::DataRootMissing(path.to_path_buf()))
        }
        Err(source) => Err(PreflightError::Unreadable {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// `*.tmp` files one level below the dataset root's year directories.
fn stale_candidates(dataset_root: &Path) -> Result<Vec<PathBuf>, PreflightError> {
    let unreadable = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PreflightError::Unreadable { path, source }
    };

    let mut found = Vec::new();
    for entry in fs::read_dir(dataset_root).map_err(unreadable(dataset_root))? {
        let year_dir = entry.map_err(unreadable(dataset_root))?.path();
        if !year_dir.is_dir() {
            continue;
        }
        for file in fs::read_dir(&year_dir).map_err(unreadable(&year_dir))? {
            let path = file.map_err(unreadable(&year_dir))?.path();
            if path.extension().is_some_and(|e| e == "tmp") {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_at(root: &Path) -> ConsolidationConfig {
        ConsolidationConfig::default().with_data_root(root)
    }

    #[test]
    fn missing_data_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = check(&config_at(&dir.path().join("absent"))).unwrap_err();
        assert!(matches!(err, PreflightError::DataRootMissing(_)));
    }

    #[test]
    fn data_root_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data");
        fs::write(&file, b"").unwrap();
        assert!(matches!(
            check(&config_at(&file)),
            Err(PreflightError::NotADirectory(_))
        ));
    }

    #[test]
    fn splits_present_and_missing_datasets() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("KR-1d/2020")).unwrap();

        let report = check(&config_at(dir.path())).unwrap();

        assert_eq!(report.present, vec![DatasetKind::Kr1d]);
        assert_eq!(report.missing, vec![DatasetKind::Kr1m, DatasetKind::Us5m]);
        assert!(report.stale_candidates.is_empty());
    }

    #[test]
    fn reports_stale_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let year = dir.path().join("KR-1d/2020");
        fs::create_dir_all(&year).unwrap();
        fs::write(year.join("2020-01.parquet.tmp"), b"half").unwrap();
        fs::write(year.join("2020-01-02.parquet"), b"day").unwrap();

        let report = check(&config_at(dir.path())).unwrap();
        assert_eq!(report.stale_candidates, vec![year.join("2020-01.parquet.tmp")]);
    }

    #[test]
    fn dataset_root_that_is_a_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("KR-1m"), b"").unwrap();
        assert!(matches!(
            check(&config_at(dir.path())),
            Err(PreflightError::NotADirectory(_))
        ));
    }
}
