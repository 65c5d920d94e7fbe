//! Merge a window's shards into one candidate artifact.
//!
//! Pipeline per job:
//! 1. Read every input shard in catalog order (a pre-existing target first).
//! 2. Diagonal concat: every column any shard carries, null-filled elsewhere.
//! 3. Full-row dedup, first occurrence kept.
//! 4. Stable sort by the dataset's sort key, unless a key column is missing.
//! 5. Write to the staging path `{target}.tmp`.
//!
//! Nothing here deletes or rewrites an input. Promotion and cleanup belong to
//! the rollback manager, after verification.

use crate::dataset::SortKey;
use crate::error::ConsolidationError;
use crate::window::WindowKey;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One window's worth of consolidation work.
#[derive(Debug, Clone)]
pub struct ConsolidationJob {
    pub window: WindowKey,
    /// Finer-grained shards, sorted. Deleted on commit.
    pub inputs: Vec<PathBuf>,
    /// Artifact already sitting at `target` from an earlier run. Read as the
    /// first input but never deleted; the verified candidate replaces it.
    pub prior_target: Option<PathBuf>,
    pub target: PathBuf,
    pub sort_key: SortKey,
}

impl ConsolidationJob {
    pub fn new(
        window: WindowKey,
        mut inputs: Vec<PathBuf>,
        target: PathBuf,
        sort_key: SortKey,
    ) -> Self {
        inputs.sort();
        let prior_target = target.is_file().then(|| target.clone());
        Self {
            window,
            inputs,
            prior_target,
            target,
            sort_key,
        }
    }

    /// Staging path the candidate is written to before promotion.
    pub fn candidate_path(&self) -> PathBuf {
        let mut name = self
            .target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.target.with_file_name(name)
    }

    /// Files read by the merge, in order.
    pub fn read_order(&self) -> impl Iterator<Item = &PathBuf> {
        self.prior_target.iter().chain(self.inputs.iter())
    }
}

/// The merge buffer: deduplicated, canonically ordered rows for one window.
#[derive(Debug, Clone)]
pub struct MergedTable {
    pub frame: DataFrame,
    pub sort_key: SortKey,
    pub input_rows: usize,
    pub duplicates_dropped: usize,
    /// False when sort key columns were missing and the sort was skipped.
    pub sorted: bool,
}

impl MergedTable {
    pub fn output_rows(&self) -> usize {
        self.frame.height()
    }
}

/// Parquet compression codec for written artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Zstd,
    Snappy,
    Uncompressed,
}

impl Compression {
    fn to_parquet(self) -> ParquetCompression {
        match self {
            Compression::Zstd => ParquetCompression::Zstd(None),
            Compression::Snappy => ParquetCompression::Snappy,
            Compression::Uncompressed => ParquetCompression::Uncompressed,
        }
    }
}

/// Serializes a merged frame to storage.
pub trait ArtifactWriter: Send + Sync {
    fn write(&self, frame: &DataFrame, path: &Path) -> Result<(), ConsolidationError>;
}

/// Writes Parquet and fsyncs before returning.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetArtifactWriter {
    compression: Compression,
}

impl ParquetArtifactWriter {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }
}

impl ArtifactWriter for ParquetArtifactWriter {
    fn write(&self, frame: &DataFrame, path: &Path) -> Result<(), ConsolidationError> {
        let write_err = |reason: String| ConsolidationError::Write {
            path: path.to_path_buf(),
            reason,
        };

        let mut file = fs::File::create(path).map_err(|e| write_err(format!("create file: {e}")))?;
        let mut frame = frame.clone();
        ParquetWriter::new(&mut file)
            .with_compression(self.compression.to_parquet())
            .finish(&mut frame)
            .map_err(|e| write_err(format!("write parquet: {e}")))?;
        file.sync_all()
            .map_err(|e| write_err(format!("sync: {e}")))?;
        Ok(())
    }
}

/// Read one shard fully into memory.
pub fn read_shard(path: &Path) -> Result<DataFrame, ConsolidationError> {
    let read_err = |reason: String| ConsolidationError::Read {
        path: path.to_path_buf(),
        reason,
    };
    let file = fs::File::open(path).map_err(|e| read_err(format!("open: {e}")))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| read_err(format!("read: {e}")))
}

/// Stable ascending sort on every sort key column.
pub fn sort_by_key(frame: DataFrame, sort_key: &SortKey) -> PolarsResult<DataFrame> {
    let by: Vec<&str> = sort_key.columns().iter().map(String::as_str).collect();
    frame
        .lazy()
        .sort(by, SortMultipleOptions::default().with_maintain_order(true))
        .collect()
}

/// Concatenate, dedup and sort already-loaded frames.
pub fn merge_frames(
    window: &WindowKey,
    frames: Vec<DataFrame>,
    sort_key: &SortKey,
) -> Result<MergedTable, ConsolidationError> {
    let merge_err = |e: PolarsError| ConsolidationError::Merge {
        window: *window,
        reason: e.to_string(),
    };

    if frames.is_empty() {
        return Err(ConsolidationError::EmptyJob { window: *window });
    }

    if let Some(reason) = dtype_drift(&frames) {
        return Err(ConsolidationError::Merge {
            window: *window,
            reason,
        });
    }

    let input_rows: usize = frames.iter().map(DataFrame::height).sum();
    let lazy: Vec<LazyFrame> = frames.into_iter().map(|f| f.lazy()).collect();

    let deduped = concat_lf_diagonal(
        lazy,
        UnionArgs {
            rechunk: true,
            to_supertypes: false,
            ..Default::default()
        },
    )
    .map_err(merge_err)?
    .unique_stable(None, UniqueKeepStrategy::First)
    .collect()
    .map_err(merge_err)?;

    let duplicates_dropped = input_rows - deduped.height();

    let missing = sort_key.missing_in(&deduped);
    let (frame, sorted) = if missing.is_empty() {
        (sort_by_key(deduped, sort_key).map_err(merge_err)?, true)
    } else {
        warn!(
            window = %window,
            missing = ?missing,
            "sort key columns absent; skipping sort"
        );
        (deduped, false)
    };

    Ok(MergedTable {
        frame,
        sort_key: sort_key.clone(),
        input_rows,
        duplicates_dropped,
        sorted,
    })
}

/// First column whose dtype differs between frames. Shards never get upcast
/// to a common supertype.
fn dtype_drift(frames: &[DataFrame]) -> Option<String> {
    let mut seen: HashMap<&str, &DataType> = HashMap::new();
    for frame in frames {
        for column in frame.get_columns() {
            let name = column.name().as_str();
            match seen.get(name) {
                Some(&first) if first != column.dtype() => {
                    return Some(format!(
                        "column '{name}' is {first} in one shard and {} in another",
                        column.dtype()
                    ));
                }
                Some(_) => {}
                None => {
                    seen.insert(name, column.dtype());
                }
            }
        }
    }
    None
}

/// Builds candidate artifacts for consolidation jobs.
pub struct Consolidator {
    writer: Box<dyn ArtifactWriter>,
}

impl Consolidator {
    pub fn new(writer: Box<dyn ArtifactWriter>) -> Self {
        Self { writer }
    }

    pub fn parquet(compression: Compression) -> Self {
        Self::new(Box::new(ParquetArtifactWriter::new(compression)))
    }

    /// Read and merge a job's inputs into the in-memory merge buffer.
    pub fn merge(&self, job: &ConsolidationJob) -> Result<MergedTable, ConsolidationError> {
        if job.inputs.is_empty() {
            return Err(ConsolidationError::EmptyJob { window: job.window });
        }

        let frames = job
            .read_order()
            .map(|path| {
                let frame = read_shard(path)?;
                debug!(path = %path.display(), rows = frame.height(), "read shard");
                Ok(frame)
            })
            .collect::<Result<Vec<_>, ConsolidationError>>()?;

        merge_frames(&job.window, frames, &job.sort_key)
    }

    /// Write the merge buffer to the job's staging path.
    pub fn write_candidate(
        &self,
        job: &ConsolidationJob,
        table: &MergedTable,
    ) -> Result<PathBuf, ConsolidationError> {
        let candidate = job.candidate_path();
        if let Some(dir) = candidate.parent() {
            fs::create_dir_all(dir).map_err(|source| ConsolidationError::TargetDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        self.writer.write(&table.frame, &candidate)?;
        Ok(candidate)
    }

    /// Merge then stage. Returns the merge buffer and the candidate path.
    pub fn consolidate(
        &self,
        job: &ConsolidationJob,
    ) -> Result<(MergedTable, PathBuf), ConsolidationError> {
        let table = self.merge(job)?;
        let candidate = self.write_candidate(job, &table)?;
        info!(
            window = %job.window,
            files = job.inputs.len(),
            rows_in = table.input_rows,
            rows_out = table.output_rows(),
            duplicates = table.duplicates_dropped,
            "staged candidate {}",
            candidate.display()
        );
        Ok((table, candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetKind;
    use crate::test_helpers::{daily_bars, quotes, write_shard};
    use chrono::NaiveDate;

    fn month_window() -> WindowKey {
        WindowKey::Month { year: 2020, month: 1 }
    }

    #[test]
    fn merge_dedups_and_sorts() {
        let a = daily_bars(&[("B", "2020-01-02", 10), ("A", "2020-01-02", 20)]);
        let b = daily_bars(&[("A", "2020-01-01", 30), ("B", "2020-01-02", 10)]);

        let merged = merge_frames(&month_window(), vec![a, b], &DatasetKind::Kr1d.sort_key()).unwrap();

        assert_eq!(merged.input_rows, 4);
        assert_eq!(merged.output_rows(), 3);
        assert_eq!(merged.duplicates_dropped, 1);
        assert!(merged.sorted);

        let symbols: Vec<_> = merged
            .frame
            .column("symbol")
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|s| s.unwrap().to_string())
            .collect();
        assert_eq!(symbols, vec!["A", "A", "B"]);
        let closes: Vec<_> = merged
            .frame
            .column("close")
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(closes, vec![Some(30), Some(20), Some(10)]);
    }

    #[test]
    fn same_key_different_values_are_both_kept() {
        let a = daily_bars(&[("A", "2020-01-02", 10)]);
        let b = daily_bars(&[("A", "2020-01-02", 11)]);

        let merged = merge_frames(&month_window(), vec![a, b], &DatasetKind::Kr1d.sort_key()).unwrap();

        assert_eq!(merged.output_rows(), 2);
        assert_eq!(merged.duplicates_dropped, 0);
    }

    #[test]
    fn missing_sort_columns_skip_sort() {
        let a = df!("symbol" => &["B", "A"], "price" => &[2i64, 1]).unwrap();

        let merged = merge_frames(&month_window(), vec![a], &DatasetKind::Kr1d.sort_key()).unwrap();

        assert!(!merged.sorted);
        let first = merged.frame.column("symbol").unwrap().str().unwrap().get(0);
        assert_eq!(first, Some("B"));
    }

    #[test]
    fn diagonal_concat_keeps_every_column() {
        let a = df!("symbol" => &["A"], "price" => &[1i64]).unwrap();
        let b = df!("symbol" => &["B"], "price" => &[2i64], "venue" => &["KRX"]).unwrap();

        let merged = merge_frames(&month_window(), vec![a, b], &SortKey::new(["symbol"])).unwrap();

        assert_eq!(merged.frame.width(), 3);
        let venue = merged.frame.column("venue").unwrap();
        assert_eq!(venue.null_count(), 1);
    }

    #[test]
    fn dtype_drift_between_shards_is_a_merge_error() {
        let ints = df!("symbol" => &["A"], "price" => &[100i64]).unwrap();
        let floats = df!("symbol" => &["B"], "price" => &[100.5f64]).unwrap();

        let err = merge_frames(&month_window(), vec![ints, floats], &SortKey::new(["symbol"]))
            .unwrap_err();

        match err {
            ConsolidationError::Merge { reason, .. } => assert!(reason.contains("'price'"), "{reason}"),
            other => panic!("expected merge error, got {other:?}"),
        }
    }

    #[test]
    fn empty_input_list_is_an_error() {
        let err = merge_frames(&month_window(), vec![], &SortKey::new(["symbol"])).unwrap_err();
        assert!(matches!(err, ConsolidationError::EmptyJob { .. }));
    }

    #[test]
    fn corrupt_input_aborts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("2020/2020-01-01.parquet");
        let bad = dir.path().join("2020/2020-01-02.parquet");
        write_shard(&good, &daily_bars(&[("A", "2020-01-01", 1)]));
        fs::write(&bad, b"not parquet at all").unwrap();

        let job = ConsolidationJob::new(
            month_window(),
            vec![bad.clone(), good.clone()],
            dir.path().join("2020/2020-01.parquet"),
            DatasetKind::Kr1d.sort_key(),
        );
        let consolidator = Consolidator::parquet(Compression::Zstd);
        let err = consolidator.consolidate(&job).unwrap_err();

        assert!(matches!(err, ConsolidationError::Read { ref path, .. } if *path == bad));
        assert!(!job.candidate_path().exists());
        assert!(!job.target.exists());
        assert!(good.exists() && bad.exists());
    }

    #[test]
    fn candidate_is_staged_next_to_target() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("2020/2020-01-01.parquet");
        write_shard(&day, &quotes(&[("005930", "2020-01-01 09:00", 100, 5)]));

        let job = ConsolidationJob::new(
            month_window(),
            vec![day.clone()],
            dir.path().join("2020/2020-01.parquet"),
            DatasetKind::Kr1m.sort_key(),
        );
        let (table, candidate) = Consolidator::parquet(Compression::Snappy)
            .consolidate(&job)
            .unwrap();

        assert_eq!(candidate, dir.path().join("2020/2020-01.parquet.tmp"));
        assert!(candidate.exists());
        assert!(!job.target.exists());
        assert!(day.exists());
        assert_eq!(table.output_rows(), 1);
        assert_eq!(read_shard(&candidate).unwrap().height(), 1);
    }

    #[test]
    fn prior_target_is_read_first() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("2020/2020-01.parquet");
        write_shard(&target, &daily_bars(&[("A", "2020-01-01", 1)]));
        let day = dir.path().join("2020/2020-01-02.parquet");
        write_shard(&day, &daily_bars(&[("A", "2020-01-02", 2)]));

        let job = ConsolidationJob::new(
            month_window(),
            vec![day.clone()],
            target.clone(),
            DatasetKind::Kr1d.sort_key(),
        );

        assert_eq!(job.prior_target.as_ref(), Some(&target));
        assert_eq!(job.read_order().collect::<Vec<_>>(), vec![&target, &day]);

        let table = Consolidator::parquet(Compression::Zstd).merge(&job).unwrap();
        assert_eq!(table.output_rows(), 2);
        let first = table.frame.column("date").unwrap().date().unwrap().get(0);
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        let jan1 = (NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() - epoch).num_days() as i32;
        assert_eq!(first, Some(jan1));
    }
}
