//! Independent audit of consolidated artifacts against raw day sources.
//!
//! The expected data is rebuilt from the raw `.txt` files with its own parser,
//! deduplicated, sorted, and inner-joined with the artifact on the sort key.
//! Float columns compare with `|a - b| <= ATOL + RTOL * |b|` (NaN equals NaN);
//! every other column compares exactly.

use crate::consolidate::{merge_frames, read_shard};
use crate::dataset::{DatasetKind, SchemaError};
use crate::error::ConsolidationError;
use crate::raw::{raw_files_in, read_raw_file};
use crate::window::{Granularity, WindowKey};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const RTOL: f64 = 1e-5;
pub const ATOL: f64 = 1e-8;

const ARTIFACT_EXTENSION: &str = "parquet";
const ARTIFACT_SUFFIX: &str = "_pq";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("'{0}' is not a YYYY year key")]
    BadYearKey(String),

    #[error("cannot list {}: {source}", path.display())]
    List {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("artifact {} not found", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("no readable raw sources for {window}")]
    NoRawSources { window: WindowKey },

    #[error("artifact {}: {source}", path.display())]
    ArtifactSchema { path: PathBuf, source: SchemaError },

    #[error(transparent)]
    Consolidation(#[from] ConsolidationError),

    #[error("comparing frames: {0}")]
    Polars(#[from] PolarsError),
}

/// Cells of one value column that disagree between raw and artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDiscrepancy {
    pub column: String,
    pub mismatched: usize,
    /// First disagreeing pair, rendered as (raw, artifact).
    pub sample: Option<(String, String)>,
}

/// Result of auditing one window.
#[derive(Debug, Clone)]
pub struct AuditReport {
    pub kind: DatasetKind,
    pub window: WindowKey,
    pub artifact: PathBuf,
    pub raw_files: usize,
    /// Raw files that could not be parsed, with the reason.
    pub skipped_files: Vec<(PathBuf, String)>,
    pub expected_rows: usize,
    pub matched_rows: usize,
    pub discrepancies: Vec<ColumnDiscrepancy>,
}

impl AuditReport {
    pub fn shortfall(&self) -> usize {
        self.expected_rows.saturating_sub(self.matched_rows)
    }

    pub fn total_mismatches(&self) -> usize {
        self.discrepancies.iter().map(|d| d.mismatched).sum()
    }

    pub fn is_ok(&self) -> bool {
        self.matched_rows == self.expected_rows && self.discrepancies.is_empty()
    }

    fn label(&self) -> String {
        match self.window {
            WindowKey::Year(year) => format!("Year {year}"),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (path, reason) in &self.skipped_files {
            writeln!(f, "[WARN] Skipped raw source {}: {reason}", path.display())?;
        }
        if self.matched_rows != self.expected_rows {
            writeln!(
                f,
                "[FAIL] Row count mismatch! Raw: {}, matched in artifact: {}",
                self.expected_rows, self.matched_rows
            )?;
        }
        for d in &self.discrepancies {
            writeln!(f, "[FAIL] Column '{}' mismatch count: {}", d.column, d.mismatched)?;
            if let Some((raw, artifact)) = &d.sample {
                writeln!(f, "       Sample: raw={raw}, artifact={artifact}")?;
            }
        }
        if self.is_ok() {
            write!(f, "[OK] {}: Perfectly matched {} rows.", self.label(), self.expected_rows)
        } else {
            write!(
                f,
                "[FAIL] {}: Validation failed with {} missing rows and {} mismatched cells.",
                self.label(),
                self.shortfall(),
                self.total_mismatches()
            )
        }
    }
}

/// Audit `<year_dir>/<year_key>.parquet` against the year's raw day files.
pub fn validate_year(
    kind: DatasetKind,
    year_dir: &Path,
    year_key: &str,
) -> Result<AuditReport, AuditError> {
    let window = match WindowKey::parse(year_key).parsed() {
        Some(key @ WindowKey::Year(_)) => key,
        _ => return Err(AuditError::BadYearKey(year_key.to_string())),
    };

    let raw: Vec<PathBuf> = list_raw(year_dir)?
        .into_iter()
        .filter(|path| day_of(path).map_or(true, |day| day.year() == window.year()))
        .collect();

    audit_window(kind, window, &raw, &artifact_path(year_dir, &window))
}

/// Audit every monthly artifact in a year directory against its raw day files.
///
/// Months whose artifact does not exist yet are skipped.
pub fn validate_months(kind: DatasetKind, year_dir: &Path) -> Result<Vec<AuditReport>, AuditError> {
    let mut by_month: BTreeMap<WindowKey, Vec<PathBuf>> = BTreeMap::new();
    for path in list_raw(year_dir)? {
        if let Some(month) = day_of(&path).and_then(|day| day.parent()) {
            by_month.entry(month).or_default().push(path);
        }
    }

    let mut reports = Vec::with_capacity(by_month.len());
    for (month, files) in by_month {
        let artifact = artifact_path(year_dir, &month);
        if !artifact.is_file() {
            info!(window = %month, "[SKIP] monthly artifact not found");
            continue;
        }
        reports.push(audit_window(kind, month, &files, &artifact)?);
    }
    Ok(reports)
}

/// Audit one artifact against an explicit list of raw files.
pub fn audit_window(
    kind: DatasetKind,
    window: WindowKey,
    raw_files: &[PathBuf],
    artifact: &Path,
) -> Result<AuditReport, AuditError> {
    if !artifact.is_file() {
        return Err(AuditError::MissingArtifact {
            path: artifact.to_path_buf(),
        });
    }
    info!(
        window = %window,
        files = raw_files.len(),
        "[CHECK] validating against {}",
        artifact.display()
    );

    let mut frames = Vec::with_capacity(raw_files.len());
    let mut skipped_files = Vec::new();
    for path in raw_files {
        match read_raw_file(kind, path) {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                warn!(path = %path.display(), "skipping raw source: {e}");
                skipped_files.push((path.clone(), e.to_string()));
            }
        }
    }
    if frames.is_empty() {
        return Err(AuditError::NoRawSources { window });
    }

    let sort_key = kind.sort_key();
    let expected = merge_frames(&window, frames, &sort_key)?.frame;
    let archived = artifact_frame(kind, artifact)?;

    let keys: Vec<Expr> = sort_key.columns().iter().map(|c| col(c.as_str())).collect();
    let joined = expected
        .clone()
        .lazy()
        .join(archived.lazy(), &keys, &keys, JoinArgs::new(JoinType::Inner))
        .collect()?;

    let mut discrepancies = Vec::new();
    for name in value_columns(kind) {
        let raw = joined.column(&name)?.as_materialized_series();
        let archived = joined
            .column(&format!("{name}{ARTIFACT_SUFFIX}"))?
            .as_materialized_series();
        if let Some(d) = compare_column(&name, raw, archived)? {
            discrepancies.push(d);
        }
    }

    let report = AuditReport {
        kind,
        window,
        artifact: artifact.to_path_buf(),
        raw_files: raw_files.len(),
        skipped_files,
        expected_rows: expected.height(),
        matched_rows: joined.height(),
        discrepancies,
    };
    if report.is_ok() {
        info!(window = %window, rows = report.expected_rows, "[OK] audit passed");
    } else {
        warn!(
            window = %window,
            shortfall = report.shortfall(),
            mismatches = report.total_mismatches(),
            "[FAIL] audit found discrepancies"
        );
    }
    Ok(report)
}

/// The artifact cast to the canonical dtypes, value columns suffixed, deduplicated.
fn artifact_frame(kind: DatasetKind, artifact: &Path) -> Result<DataFrame, AuditError> {
    let frame = read_shard(artifact)?;
    kind.require_columns(&frame)
        .map_err(|source| AuditError::ArtifactSchema {
            path: artifact.to_path_buf(),
            source,
        })?;
    let schema = kind.schema();
    let sort_key = kind.sort_key();

    let mut exprs = Vec::with_capacity(schema.len());
    for field in schema.iter_fields() {
        let name = field.name().as_str();
        let expr = col(name).cast(field.dtype().clone());
        if sort_key.columns().iter().any(|k| k == name) {
            exprs.push(expr);
        } else {
            exprs.push(expr.alias(format!("{name}{ARTIFACT_SUFFIX}")));
        }
    }

    Ok(frame
        .lazy()
        .select(exprs)
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?)
}

fn value_columns(kind: DatasetKind) -> Vec<String> {
    let sort_key = kind.sort_key();
    kind.schema()
        .iter_names()
        .map(|n| n.to_string())
        .filter(|n| !sort_key.columns().contains(n))
        .collect()
}

fn compare_column(
    name: &str,
    raw: &Series,
    archived: &Series,
) -> Result<Option<ColumnDiscrepancy>, AuditError> {
    let matches: Vec<bool> = if raw.dtype().is_float() {
        raw.f64()?
            .into_iter()
            .zip(archived.f64()?)
            .map(|(a, b)| floats_close(a, b))
            .collect()
    } else {
        raw.equal_missing(archived)?
            .into_iter()
            .map(|eq| eq == Some(true))
            .collect()
    };

    let mismatched = matches.iter().filter(|ok| !**ok).count();
    if mismatched == 0 {
        return Ok(None);
    }

    let sample = match matches.iter().position(|ok| !ok) {
        Some(i) => Some((raw.get(i)?.to_string(), archived.get(i)?.to_string())),
        None => None,
    };
    Ok(Some(ColumnDiscrepancy {
        column: name.to_string(),
        mismatched,
        sample,
    }))
}

fn floats_close(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) if a.is_nan() || b.is_nan() => a.is_nan() && b.is_nan(),
        (Some(a), Some(b)) => (a - b).abs() <= ATOL + RTOL * b.abs(),
        (None, None) => true,
        _ => false,
    }
}

fn list_raw(year_dir: &Path) -> Result<Vec<PathBuf>, AuditError> {
    raw_files_in(year_dir).map_err(|source| AuditError::List {
        path: year_dir.to_path_buf(),
        source,
    })
}

fn day_of(path: &Path) -> Option<WindowKey> {
    WindowKey::from_path(path)
        .parsed()
        .filter(|key| key.granularity() == Granularity::Day)
}

fn artifact_path(year_dir: &Path, window: &WindowKey) -> PathBuf {
    year_dir.join(format!("{window}.{ARTIFACT_EXTENSION}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{daily_bars, us_quotes, write_raw, write_shard};

    fn kr_daily_year(dir: &Path) -> PathBuf {
        let year_dir = dir.join("2020");
        write_raw(&year_dir.join("2020-01-02.txt"), &["A\t9\t12\t8\t10\t1000"]);
        write_raw(
            &year_dir.join("2020-02-03.txt"),
            &["B\t19\t22\t18\t20\t2000", "B\t19\t22\t18\t20\t2000"],
        );
        year_dir
    }

    #[test]
    fn matching_year_passes() {
        let dir = tempfile::tempdir().unwrap();
        let year_dir = kr_daily_year(dir.path());
        write_shard(
            &year_dir.join("2020.parquet"),
            &daily_bars(&[("B", "2020-02-03", 20), ("A", "2020-01-02", 10)]),
        );

        let report = validate_year(DatasetKind::Kr1d, &year_dir, "2020").unwrap();

        assert!(report.is_ok(), "{report}");
        assert_eq!(report.expected_rows, 2);
        assert_eq!(report.raw_files, 2);
        assert_eq!(report.to_string(), "[OK] Year 2020: Perfectly matched 2 rows.");
    }

    #[test]
    fn missing_row_is_a_shortfall() {
        let dir = tempfile::tempdir().unwrap();
        let year_dir = kr_daily_year(dir.path());
        write_shard(
            &year_dir.join("2020.parquet"),
            &daily_bars(&[("A", "2020-01-02", 10)]),
        );

        let report = validate_year(DatasetKind::Kr1d, &year_dir, "2020").unwrap();

        assert!(!report.is_ok());
        assert_eq!(report.shortfall(), 1);
        assert!(report.to_string().contains("Row count mismatch! Raw: 2, matched in artifact: 1"));
    }

    #[test]
    fn value_mismatch_reports_sample() {
        let dir = tempfile::tempdir().unwrap();
        let year_dir = kr_daily_year(dir.path());
        write_shard(
            &year_dir.join("2020.parquet"),
            &daily_bars(&[("A", "2020-01-02", 11), ("B", "2020-02-03", 20)]),
        );

        let report = validate_year(DatasetKind::Kr1d, &year_dir, "2020").unwrap();

        let close = report
            .discrepancies
            .iter()
            .find(|d| d.column == "close")
            .unwrap();
        assert_eq!(close.mismatched, 1);
        assert_eq!(close.sample, Some(("10".to_string(), "11".to_string())));
        assert!(report
            .to_string()
            .contains("[FAIL] Column 'close' mismatch count: 1"));
    }

    #[test]
    fn float_prices_compare_with_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        let year_dir = dir.path().join("2020");
        write_raw(&year_dir.join("2020-01-02.txt"), &["AAPL\t300.5\t10\t09:30"]);
        let artifact = year_dir.join("2020.parquet");

        write_shard(
            &artifact,
            &us_quotes(&[("AAPL", "2020-01-02 09:30", 300.5 + 1e-6, 10)]),
        );
        assert!(validate_year(DatasetKind::Us5m, &year_dir, "2020").unwrap().is_ok());

        write_shard(
            &artifact,
            &us_quotes(&[("AAPL", "2020-01-02 09:30", 300.6, 10)]),
        );
        let report = validate_year(DatasetKind::Us5m, &year_dir, "2020").unwrap();
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].column, "price");
    }

    #[test]
    fn floats_close_treats_nan_as_equal() {
        assert!(floats_close(Some(f64::NAN), Some(f64::NAN)));
        assert!(!floats_close(Some(f64::NAN), Some(1.0)));
        assert!(floats_close(None, None));
        assert!(!floats_close(Some(1.0), None));
        assert!(floats_close(Some(100.0), Some(100.0009)));
        assert!(!floats_close(Some(100.0), Some(100.01)));
    }

    #[test]
    fn unparseable_raw_file_is_skipped_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let year_dir = kr_daily_year(dir.path());
        write_raw(&year_dir.join("2020-03-02.txt"), &["broken"]);
        write_shard(
            &year_dir.join("2020.parquet"),
            &daily_bars(&[("A", "2020-01-02", 10), ("B", "2020-02-03", 20)]),
        );

        let report = validate_year(DatasetKind::Kr1d, &year_dir, "2020").unwrap();

        assert!(report.is_ok());
        assert_eq!(report.skipped_files.len(), 1);
        assert!(report.to_string().starts_with("[WARN] Skipped raw source"));
    }

    #[test]
    fn missing_artifact_and_bad_key_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let year_dir = kr_daily_year(dir.path());
        assert!(matches!(
            validate_year(DatasetKind::Kr1d, &year_dir, "2020"),
            Err(AuditError::MissingArtifact { .. })
        ));
        assert!(matches!(
            validate_year(DatasetKind::Kr1d, &year_dir, "2020-01"),
            Err(AuditError::BadYearKey(_))
        ));
    }

    #[test]
    fn artifact_missing_a_column_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let year_dir = kr_daily_year(dir.path());
        let artifact = daily_bars(&[("A", "2020-01-02", 10), ("B", "2020-02-03", 20)])
            .drop("open")
            .unwrap();
        write_shard(&year_dir.join("2020.parquet"), &artifact);

        match validate_year(DatasetKind::Kr1d, &year_dir, "2020") {
            Err(AuditError::ArtifactSchema {
                source: SchemaError::MissingColumn(column),
                ..
            }) => assert_eq!(column, "open"),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn months_are_audited_separately() {
        let dir = tempfile::tempdir().unwrap();
        let year_dir = kr_daily_year(dir.path());
        write_shard(
            &year_dir.join("2020-01.parquet"),
            &daily_bars(&[("A", "2020-01-02", 10)]),
        );
        // No 2020-02 artifact yet.

        let reports = validate_months(DatasetKind::Kr1d, &year_dir).unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].window, WindowKey::Month { year: 2020, month: 1 });
        assert!(reports[0].is_ok());
        assert_eq!(reports[0].to_string(), "[OK] 2020-01: Perfectly matched 1 rows.");
    }
}
