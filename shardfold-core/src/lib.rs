//! Shardfold Core: window keys, shard discovery, merging, verification, commit.
//!
//! This crate contains the consolidation engine:
//! - Window keys and the day → month → year hierarchy
//! - Dataset kinds with their canonical schema and sort key
//! - Shard catalog grouping files by their coarser window
//! - Safety gate deciding when a window is closed
//! - Consolidator (merge, dedup, sort, stage) and Verifier (re-read, compare)
//! - Rollback manager (promote and delete inputs, or discard the candidate)
//! - Raw-source parser and an independent audit of archived artifacts

pub mod audit;
pub mod catalog;
pub mod consolidate;
pub mod dataset;
pub mod error;
pub mod gate;
pub mod raw;
pub mod rollback;
pub mod verify;
pub mod window;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use audit::{validate_months, validate_year, AuditError, AuditReport, ColumnDiscrepancy};
pub use catalog::{ShardCatalog, Tier, WindowGroups};
pub use consolidate::{
    ArtifactWriter, Compression, ConsolidationJob, Consolidator, MergedTable,
    ParquetArtifactWriter,
};
pub use dataset::{DatasetKind, RecordShape, SchemaError, SortKey};
pub use error::{CleanupError, ConsolidationError};
pub use gate::{CutoffMemo, GateDecision, SafetyGate, DEFAULT_WAIT_DAYS};
pub use raw::{read_raw_file, RawSourceError};
pub use rollback::{CommitReport, RollbackManager, RollbackReport};
pub use verify::{VerificationReport, Verifier};
pub use window::{Granularity, KeyParse, WindowKey};
