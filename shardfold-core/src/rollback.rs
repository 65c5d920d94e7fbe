//! Commit or discard a verified/failed candidate.
//!
//! The dataset root is always in its pre-job state or its fully committed
//! state, up to leftover inputs that a rerun absorbs:
//!
//! - commit: rename the staged candidate onto the target, then delete inputs.
//!   Input deletion is the commit point and only happens after verification.
//! - rollback: delete the staged candidate. Inputs and any prior target stay.

use crate::consolidate::ConsolidationJob;
use crate::error::{CleanupError, ConsolidationError};
use crate::window::WindowKey;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Outcome of a successful commit.
#[derive(Debug)]
pub struct CommitReport {
    pub window: WindowKey,
    pub target: PathBuf,
    pub deleted: Vec<PathBuf>,
    /// Inputs that survived cleanup. The job is still committed.
    pub cleanup_errors: Vec<CleanupError>,
    /// BLAKE3 hex digest of the committed artifact.
    pub digest: Option<String>,
    pub replaced_prior: bool,
}

impl CommitReport {
    pub fn is_clean(&self) -> bool {
        self.cleanup_errors.is_empty()
    }
}

/// Outcome of a rollback.
#[derive(Debug)]
pub struct RollbackReport {
    pub window: WindowKey,
    pub candidate: PathBuf,
    pub candidate_removed: bool,
    /// Set when the staged candidate exists but could not be removed.
    pub removal_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackManager;

impl RollbackManager {
    pub fn new() -> Self {
        Self
    }

    /// Promote a verified candidate and delete the job's inputs.
    ///
    /// Fails only if the candidate cannot be moved onto the target; inputs are
    /// untouched in that case and the caller should roll back.
    pub fn commit(
        &self,
        job: &ConsolidationJob,
        candidate: &Path,
    ) -> Result<CommitReport, ConsolidationError> {
        fs::rename(candidate, &job.target).map_err(|source| ConsolidationError::Promote {
            candidate: candidate.to_path_buf(),
            target: job.target.clone(),
            source,
        })?;

        let digest = match artifact_digest(&job.target) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(artifact = %job.target.display(), "could not digest committed artifact: {e}");
                None
            }
        };

        let mut deleted = Vec::with_capacity(job.inputs.len());
        let mut cleanup_errors = Vec::new();
        for input in &job.inputs {
            if *input == job.target {
                continue;
            }
            match fs::remove_file(input) {
                Ok(()) => deleted.push(input.clone()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    error!(
                        window = %job.window,
                        input = %input.display(),
                        "committed but failed to delete input: {source}"
                    );
                    cleanup_errors.push(CleanupError {
                        path: input.clone(),
                        source,
                    });
                }
            }
        }

        info!(
            window = %job.window,
            deleted = deleted.len(),
            leftover = cleanup_errors.len(),
            "committed {}",
            job.target.display()
        );

        Ok(CommitReport {
            window: job.window,
            target: job.target.clone(),
            deleted,
            cleanup_errors,
            digest,
            replaced_prior: job.prior_target.is_some(),
        })
    }

    /// Discard the staged candidate after a failure.
    pub fn rollback(&self, job: &ConsolidationJob, cause: &ConsolidationError) -> RollbackReport {
        let candidate = job.candidate_path();
        let (candidate_removed, removal_error) = match fs::remove_file(&candidate) {
            Ok(()) => (true, None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (false, None),
            Err(e) => (false, Some(e.to_string())),
        };

        match &removal_error {
            None => warn!(
                window = %job.window,
                kind = cause.kind(),
                candidate_removed,
                "rolled back: {cause}"
            ),
            Some(e) => error!(
                window = %job.window,
                candidate = %candidate.display(),
                "rollback could not remove staged candidate: {e}"
            ),
        }

        RollbackReport {
            window: job.window,
            candidate,
            candidate_removed,
            removal_error,
        }
    }
}

/// BLAKE3 hex digest of a file's bytes.
pub fn artifact_digest(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}
