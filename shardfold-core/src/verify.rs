//! Post-write verification of a staged candidate.
//!
//! The candidate is re-read from storage, re-sorted by the sort key, and
//! compared cell by cell against the merge buffer. There is no tolerance:
//! Parquet round-trips every supported dtype exactly (f64 included), so any
//! difference means the artifact on disk is not the data we merged.

use crate::consolidate::{read_shard, sort_by_key, MergedTable};
use crate::error::ConsolidationError;
use polars::prelude::*;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Cells that differ in one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMismatch {
    pub column: String,
    pub mismatched: usize,
}

/// A column whose dtype changed across the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtypeMismatch {
    pub column: String,
    pub expected: String,
    pub actual: String,
}

/// Everything the verifier compared, and what differed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub expected_rows: usize,
    pub actual_rows: usize,
    pub expected_columns: Vec<String>,
    pub actual_columns: Vec<String>,
    pub dtype_mismatches: Vec<DtypeMismatch>,
    pub column_mismatches: Vec<ColumnMismatch>,
    /// Set when the candidate could not be read back at all.
    pub read_error: Option<String>,
}

impl VerificationReport {
    pub fn is_match(&self) -> bool {
        self.read_error.is_none()
            && self.expected_rows == self.actual_rows
            && self.expected_columns == self.actual_columns
            && self.dtype_mismatches.is_empty()
            && self.column_mismatches.is_empty()
    }

    fn unreadable(expected: &DataFrame, reason: String) -> Self {
        Self {
            expected_rows: expected.height(),
            expected_columns: column_names(expected),
            read_error: Some(reason),
            ..Default::default()
        }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = &self.read_error {
            return write!(f, "candidate unreadable ({reason})");
        }
        if self.is_match() {
            return write!(f, "{} rows match", self.expected_rows);
        }

        let mut problems = Vec::new();
        if self.expected_rows != self.actual_rows {
            problems.push(format!(
                "row count {} != {}",
                self.actual_rows, self.expected_rows
            ));
        }
        if self.expected_columns != self.actual_columns {
            problems.push(format!(
                "columns {:?} != {:?}",
                self.actual_columns, self.expected_columns
            ));
        }
        for d in &self.dtype_mismatches {
            problems.push(format!("'{}' dtype {} != {}", d.column, d.actual, d.expected));
        }
        for m in &self.column_mismatches {
            problems.push(format!("'{}' {} cells differ", m.column, m.mismatched));
        }
        write!(f, "{}", problems.join("; "))
    }
}

/// Compare two frames exactly. Null equals null; ordering matters.
pub fn compare_frames(expected: &DataFrame, actual: &DataFrame) -> VerificationReport {
    let mut report = VerificationReport {
        expected_rows: expected.height(),
        actual_rows: actual.height(),
        expected_columns: column_names(expected),
        actual_columns: column_names(actual),
        ..Default::default()
    };

    for exp in expected.get_columns() {
        let Ok(act) = actual.column(exp.name().as_str()) else {
            continue;
        };
        if exp.dtype() != act.dtype() {
            report.dtype_mismatches.push(DtypeMismatch {
                column: exp.name().to_string(),
                expected: exp.dtype().to_string(),
                actual: act.dtype().to_string(),
            });
            continue;
        }
        if report.expected_rows != report.actual_rows {
            continue;
        }

        let mismatched = match exp
            .as_materialized_series()
            .equal_missing(act.as_materialized_series())
        {
            Ok(mask) => mask.into_iter().filter(|eq| *eq != Some(true)).count(),
            Err(_) => exp.len(),
        };
        if mismatched > 0 {
            report.column_mismatches.push(ColumnMismatch {
                column: exp.name().to_string(),
                mismatched,
            });
        }
    }

    report
}

fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|n| n.to_string()).collect()
}

/// Proves a candidate on disk losslessly encodes the merge buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier;

impl Verifier {
    pub fn new() -> Self {
        Self
    }

    /// Re-read `candidate` from storage and compare it with `expected`.
    ///
    /// Returns the report on an exact match, `ConsolidationError::Verification`
    /// otherwise.
    pub fn verify(
        &self,
        candidate: &Path,
        expected: &MergedTable,
    ) -> Result<VerificationReport, ConsolidationError> {
        let failed = |report: VerificationReport| ConsolidationError::Verification {
            path: candidate.to_path_buf(),
            report: Box::new(report),
        };

        let reread = match read_shard(candidate) {
            Ok(frame) => frame,
            Err(e) => {
                let report = VerificationReport::unreadable(&expected.frame, e.to_string());
                return Err(failed(report));
            }
        };

        let actual = if expected.sorted {
            match sort_by_key(reread, &expected.sort_key) {
                Ok(sorted) => sorted,
                Err(e) => {
                    return Err(failed(VerificationReport::unreadable(
                        &expected.frame,
                        format!("re-sort by {}: {e}", expected.sort_key),
                    )))
                }
            }
        } else {
            reread
        };

        let report = compare_frames(&expected.frame, &actual);
        debug!(candidate = %candidate.display(), %report, "verification compared");
        if report.is_match() {
            info!(rows = report.expected_rows, "verified {}", candidate.display());
            Ok(report)
        } else {
            Err(failed(report))
        }
    }
}
