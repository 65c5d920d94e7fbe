//! Error taxonomy for a single consolidation job.
//!
//! Every variant is scoped to one window: the orchestrator catches these at its
//! boundary and moves on to the next window.

use crate::verify::VerificationReport;
use crate::window::WindowKey;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("window {window} is not closed yet")]
    NotEligible { window: WindowKey },

    #[error("cannot read shard {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("no input shards for window {window}")]
    EmptyJob { window: WindowKey },

    #[error("merge failed for window {window}: {reason}")]
    Merge { window: WindowKey, reason: String },

    #[error("cannot create target directory {}: {source}", path.display())]
    TargetDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write candidate {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },

    #[error("candidate {} failed verification: {report}", path.display())]
    Verification {
        path: PathBuf,
        report: Box<VerificationReport>,
    },

    #[error("cannot promote candidate {} to {}: {source}", candidate.display(), target.display())]
    Promote {
        candidate: PathBuf,
        target: PathBuf,
        source: std::io::Error,
    },
}

impl ConsolidationError {
    /// Short machine-friendly label used in logs and the job ledger.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsolidationError::NotEligible { .. } => "not_eligible",
            ConsolidationError::Read { .. } => "read",
            ConsolidationError::EmptyJob { .. } => "empty_job",
            ConsolidationError::Merge { .. } => "merge",
            ConsolidationError::TargetDir { .. } => "target_dir",
            ConsolidationError::Write { .. } => "write",
            ConsolidationError::Verification { .. } => "verification",
            ConsolidationError::Promote { .. } => "promote",
        }
    }
}

/// An input shard that could not be removed after a successful commit.
///
/// Not a job failure: the data is already safely consolidated. A rerun will
/// absorb the leftover shard through dedup.
#[derive(Debug, Error)]
#[error("committed, but could not delete input {}: {source}", path.display())]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
