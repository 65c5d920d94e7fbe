//! Job ledger: JSONL append-only record of every committed or rolled-back job.
//!
//! One file per dataset root (`.shardfold-ledger.jsonl`). Each line is an
//! independent JSON object, so a partial write costs at most one entry.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shardfold_core::{DatasetKind, Tier};
use tracing::warn;

pub const LEDGER_FILE: &str = ".shardfold-ledger.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOutcome {
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub recorded_at: DateTime<Utc>,
    pub dataset: DatasetKind,
    pub tier: Tier,
    /// Canonical window label, e.g. `2020-01`.
    pub window: String,
    pub outcome: LedgerOutcome,
    pub inputs: Vec<PathBuf>,
    pub target: PathBuf,
    pub rows_in: usize,
    pub rows_out: usize,
    pub duplicates_dropped: usize,
    /// BLAKE3 digest of the committed artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Error kind and message for rollbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct JobLedger {
    path: PathBuf,
}

impl JobLedger {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn for_dataset_root(root: &Path) -> Self {
        Self::new(root.join(LEDGER_FILE))
    }

    pub fn append(&self, entry: &LedgerEntry) -> io::Result<()> {
        let json = serde_json::to_string(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "{json}")?;
        file.flush()
    }

    /// Read all entries. Malformed lines are skipped.
    pub fn read_all(&self) -> io::Result<Vec<LedgerEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        let mut entries = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = n + 1, "skipping malformed ledger line: {e}"),
            }
        }
        Ok(entries)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(window: &str, outcome: LedgerOutcome) -> LedgerEntry {
        LedgerEntry {
            recorded_at: Utc::now(),
            dataset: DatasetKind::Kr1d,
            tier: Tier::Monthly,
            window: window.to_string(),
            outcome,
            inputs: vec![PathBuf::from("2020/2020-01-02.parquet")],
            target: PathBuf::from("2020/2020-01.parquet"),
            rows_in: 3,
            rows_out: 2,
            duplicates_dropped: 1,
            digest: Some("ab".repeat(32)),
            error: None,
        }
    }

    #[test]
    fn append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::for_dataset_root(dir.path());

        let first = entry("2020-01", LedgerOutcome::Committed);
        let second = entry("2020-02", LedgerOutcome::RolledBack);
        ledger.append(&first).unwrap();
        ledger.append(&second).unwrap();

        let entries = ledger.read_all().unwrap();
        assert_eq!(entries, vec![first, second]);
        assert_eq!(ledger.path(), dir.path().join(LEDGER_FILE));
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(JobLedger::for_dataset_root(dir.path()).read_all().unwrap().is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::for_dataset_root(dir.path());
        ledger.append(&entry("2020-01", LedgerOutcome::Committed)).unwrap();
        let mut file = OpenOptions::new().append(true).open(ledger.path()).unwrap();
        writeln!(file, "{{not json").unwrap();

        assert_eq!(ledger.read_all().unwrap().len(), 1);
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&entry("2020-01", LedgerOutcome::RolledBack)).unwrap();
        assert!(json.contains(r#""outcome":"rolled_back""#));
        assert!(json.contains(r#""dataset":"kr-1d""#));
        assert!(!json.contains("\"error\""));
    }
}
