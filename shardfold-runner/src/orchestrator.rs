//! Batch driver: discovers windows, gates them, and runs each job to a
//! committed or rolled-back end state.
//!
//! Per window:
//!
//! ```text
//! Discovered → SkippedNotSafe
//!            → Eligible → Merging → Verifying → Committed
//!                                            ↘ RolledBack
//! ```
//!
//! Dataset roots are walked year directory by year directory, windows in
//! chronological order, one job at a time. Errors inside a job end that job
//! (rollback) and the batch moves on; only an unreachable dataset root fails
//! the batch.

use std::fmt;
use std::path::PathBuf;

use chrono::{Local, NaiveDate, Utc};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use shardfold_core::{
    ArtifactWriter, CommitReport, ConsolidationError, ConsolidationJob, Consolidator, CutoffMemo,
    DatasetKind, GateDecision, MergedTable, RollbackManager, SafetyGate, ShardCatalog, Tier,
    Verifier, WindowKey,
};

use crate::config::ConsolidationConfig;
use crate::ledger::{JobLedger, LedgerEntry, LedgerOutcome};

/// Batch-level failures. Anything scoped to one window is reported in the
/// summary instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("dataset root for {dataset} is unreachable: {}", path.display())]
    DatasetRoot { dataset: DatasetKind, path: PathBuf },
    #[error("cannot list {}: {source}", path.display())]
    List {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Lifecycle of one window within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Discovered,
    SkippedNotSafe,
    Eligible,
    Merging,
    Verifying,
    Committed,
    RolledBack,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::SkippedNotSafe | JobState::Committed | JobState::RolledBack
        )
    }
}

/// How a window ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    /// Not closed yet (`opens_on` set) or not a window of this tier.
    Skipped { opens_on: Option<NaiveDate> },
    /// Eligible, but this was a dry run.
    Planned,
    Committed {
        rows_in: usize,
        rows_out: usize,
        duplicates_dropped: usize,
        deleted: usize,
        /// Inputs that could not be deleted after the commit.
        leftover: usize,
        replaced_prior: bool,
        digest: Option<String>,
    },
    RolledBack {
        /// Short error kind, e.g. `read` or `verification`.
        kind: &'static str,
        reason: String,
        /// Last state reached before the failure.
        failed_in: JobState,
    },
}

#[derive(Debug, Clone)]
pub struct WindowReport {
    pub window: WindowKey,
    pub inputs: Vec<PathBuf>,
    pub state: JobState,
    pub outcome: WindowOutcome,
}

/// Result of one tier over one dataset root.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub dataset: DatasetKind,
    pub tier: Tier,
    pub dry_run: bool,
    pub windows: Vec<WindowReport>,
    /// Year directories that could not be listed, with the reason.
    pub unreadable_years: Vec<(PathBuf, String)>,
}

impl BatchSummary {
    fn new(dataset: DatasetKind, tier: Tier, dry_run: bool) -> Self {
        Self {
            dataset,
            tier,
            dry_run,
            windows: Vec::new(),
            unreadable_years: Vec::new(),
        }
    }

    fn count(&self, state: JobState) -> usize {
        self.windows.iter().filter(|w| w.state == state).count()
    }

    pub fn committed(&self) -> usize {
        self.count(JobState::Committed)
    }

    pub fn rolled_back(&self) -> usize {
        self.count(JobState::RolledBack)
    }

    pub fn skipped(&self) -> usize {
        self.count(JobState::SkippedNotSafe)
    }

    pub fn planned(&self) -> usize {
        self.windows
            .iter()
            .filter(|w| w.outcome == WindowOutcome::Planned)
            .count()
    }

    pub fn window(&self, window: &WindowKey) -> Option<&WindowReport> {
        self.windows.iter().find(|w| w.window == *window)
    }

    pub fn is_clean(&self) -> bool {
        self.rolled_back() == 0 && self.unreadable_years.is_empty()
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            return write!(
                f,
                "{} {} (dry run): {} eligible, {} not yet closed",
                self.dataset,
                self.tier,
                self.planned(),
                self.skipped()
            );
        }
        write!(
            f,
            "{} {}: {} committed, {} rolled back, {} skipped",
            self.dataset,
            self.tier,
            self.committed(),
            self.rolled_back(),
            self.skipped()
        )?;
        if !self.unreadable_years.is_empty() {
            write!(f, ", {} unreadable year dirs", self.unreadable_years.len())?;
        }
        Ok(())
    }
}

/// Runs one consolidation tier over the configured dataset roots.
pub struct Orchestrator {
    tier: Tier,
    config: ConsolidationConfig,
    today: NaiveDate,
    dry_run: bool,
    consolidator: Consolidator,
    verifier: Verifier,
    rollback: RollbackManager,
}

impl Orchestrator {
    pub fn new(tier: Tier, config: ConsolidationConfig) -> Self {
        let consolidator = Consolidator::parquet(config.compression);
        Self {
            tier,
            config,
            today: Local::now().date_naive(),
            dry_run: false,
            consolidator,
            verifier: Verifier::new(),
            rollback: RollbackManager::new(),
        }
    }

    /// Evaluate the safety gate against `today` instead of the wall clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn with_writer(mut self, writer: Box<dyn ArtifactWriter>) -> Self {
        self.consolidator = Consolidator::new(writer);
        self
    }

    /// Discover and gate only; nothing is written or deleted.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// What `run_dataset` would consolidate today, without touching any file.
    pub fn plan(&self, kind: DatasetKind) -> Result<BatchSummary, RunError> {
        self.run_inner(kind, true)
    }

    pub fn run_dataset(&self, kind: DatasetKind) -> Result<BatchSummary, RunError> {
        self.run_inner(kind, self.dry_run)
    }

    /// Every configured dataset, in parallel. Roots that do not exist are
    /// skipped with a warning.
    pub fn run_all(&self) -> Result<Vec<BatchSummary>, RunError> {
        let present: Vec<DatasetKind> = self
            .config
            .datasets
            .iter()
            .copied()
            .filter(|&kind| {
                let root = self.config.dataset_root(kind);
                let exists = root.is_dir();
                if !exists {
                    warn!(dataset = %kind, "data directory not found: {}", root.display());
                }
                exists
            })
            .collect();

        present
            .par_iter()
            .map(|&kind| self.run_dataset(kind))
            .collect()
    }

    fn run_inner(&self, kind: DatasetKind, dry_run: bool) -> Result<BatchSummary, RunError> {
        let root = self.config.dataset_root(kind);
        if !root.is_dir() {
            return Err(RunError::DatasetRoot {
                dataset: kind,
                path: root,
            });
        }

        let catalog = ShardCatalog::new(&root, self.config.extension.as_str());
        let gate = SafetyGate::new(self.tier, self.today).with_wait_days(self.config.monthly_wait_days);
        let ledger = (self.config.ledger && !dry_run).then(|| JobLedger::for_dataset_root(&root));
        let mut memo = CutoffMemo::new();
        let mut summary = BatchSummary::new(kind, self.tier, dry_run);

        info!(
            dataset = %kind,
            tier = %self.tier,
            today = %self.today,
            dry_run,
            "scanning {}",
            root.display()
        );

        let years = catalog.year_dirs().map_err(|source| RunError::List {
            path: root.clone(),
            source,
        })?;

        for (year, year_dir) in years {
            let groups = match catalog.groups_in_year(self.tier, &year_dir) {
                Ok(groups) => groups,
                Err(e) => {
                    error!(dataset = %kind, year, "cannot list year directory: {e}");
                    summary.unreadable_years.push((year_dir, e.to_string()));
                    continue;
                }
            };
            for (window, inputs) in groups {
                let report = self.process_window(
                    kind,
                    &catalog,
                    &gate,
                    &mut memo,
                    ledger.as_ref(),
                    dry_run,
                    window,
                    inputs,
                );
                summary.windows.push(report);
            }
        }

        info!(dataset = %kind, tier = %self.tier, "{summary}");
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_window(
        &self,
        kind: DatasetKind,
        catalog: &ShardCatalog,
        gate: &SafetyGate,
        memo: &mut CutoffMemo,
        ledger: Option<&JobLedger>,
        dry_run: bool,
        window: WindowKey,
        inputs: Vec<PathBuf>,
    ) -> WindowReport {
        let mut state = JobState::Discovered;
        let finish = |state: JobState, inputs: Vec<PathBuf>, outcome: WindowOutcome| WindowReport {
            window,
            inputs,
            state,
            outcome,
        };

        match gate.evaluate(&window, memo) {
            GateDecision::Eligible => advance(&mut state, JobState::Eligible, &window),
            GateDecision::NotYetClosed { opens_on } => {
                info!(dataset = %kind, window = %window, %opens_on, "[SKIP] window not closed yet");
                return finish(
                    JobState::SkippedNotSafe,
                    inputs,
                    WindowOutcome::Skipped {
                        opens_on: Some(opens_on),
                    },
                );
            }
            GateDecision::Malformed => {
                return finish(
                    JobState::SkippedNotSafe,
                    inputs,
                    WindowOutcome::Skipped { opens_on: None },
                );
            }
        }

        if dry_run {
            info!(dataset = %kind, window = %window, files = inputs.len(), "[PLAN] would consolidate");
            return finish(state, inputs, WindowOutcome::Planned);
        }

        let job = ConsolidationJob::new(window, inputs, catalog.target_path(&window), kind.sort_key());
        let (state, outcome, table) = match self.execute(&job, &mut state) {
            Ok((table, commit)) => {
                info!(
                    dataset = %kind,
                    window = %window,
                    files = job.inputs.len(),
                    rows = table.output_rows(),
                    "[OK] consolidated into {}",
                    job.target.display()
                );
                (JobState::Committed, committed_outcome(&table, &commit), Some(table))
            }
            Err(e) => {
                let failed_in = state;
                let rollback = self.rollback.rollback(&job, &e);
                advance(&mut state, JobState::RolledBack, &window);
                warn!(
                    dataset = %kind,
                    window = %window,
                    kind = e.kind(),
                    candidate_removed = rollback.candidate_removed,
                    "[ROLLBACK] {e}"
                );
                let outcome = WindowOutcome::RolledBack {
                    kind: e.kind(),
                    reason: e.to_string(),
                    failed_in,
                };
                (state, outcome, None)
            }
        };

        let entry = ledger_entry(kind, self.tier, &job, &outcome, table.as_ref());
        if let (Some(ledger), Some(entry)) = (ledger, entry) {
            if let Err(e) = ledger.append(&entry) {
                warn!(dataset = %kind, window = %window, "could not append to job ledger: {e}");
            }
        }

        finish(state, job.inputs, outcome)
    }

    /// Merge, stage, verify, commit. `state` tracks the last step entered.
    fn execute(
        &self,
        job: &ConsolidationJob,
        state: &mut JobState,
    ) -> Result<(MergedTable, CommitReport), ConsolidationError> {
        advance(state, JobState::Merging, &job.window);
        let (table, candidate) = self.consolidator.consolidate(job)?;

        advance(state, JobState::Verifying, &job.window);
        self.verifier.verify(&candidate, &table)?;

        let commit = self.rollback.commit(job, &candidate)?;
        advance(state, JobState::Committed, &job.window);
        Ok((table, commit))
    }
}

fn advance(state: &mut JobState, next: JobState, window: &WindowKey) {
    debug!(window = %window, from = ?state, to = ?next, "job state");
    *state = next;
}

fn committed_outcome(table: &MergedTable, commit: &CommitReport) -> WindowOutcome {
    WindowOutcome::Committed {
        rows_in: table.input_rows,
        rows_out: table.output_rows(),
        duplicates_dropped: table.duplicates_dropped,
        deleted: commit.deleted.len(),
        leftover: commit.cleanup_errors.len(),
        replaced_prior: commit.replaced_prior,
        digest: commit.digest.clone(),
    }
}

fn ledger_entry(
    dataset: DatasetKind,
    tier: Tier,
    job: &ConsolidationJob,
    outcome: &WindowOutcome,
    table: Option<&MergedTable>,
) -> Option<LedgerEntry> {
    let (ledger_outcome, digest, error) = match outcome {
        WindowOutcome::Committed { digest, .. } => (LedgerOutcome::Committed, digest.clone(), None),
        WindowOutcome::RolledBack { kind, reason, .. } => {
            (LedgerOutcome::RolledBack, None, Some(format!("{kind}: {reason}")))
        }
        WindowOutcome::Skipped { .. } | WindowOutcome::Planned => return None,
    };

    Some(LedgerEntry {
        recorded_at: Utc::now(),
        dataset,
        tier,
        window: job.window.to_string(),
        outcome: ledger_outcome,
        inputs: job.read_order().cloned().collect(),
        target: job.target.clone(),
        rows_in: table.map_or(0, |t| t.input_rows),
        rows_out: table.map_or(0, |t| t.output_rows()),
        duplicates_dropped: table.map_or(0, |t| t.duplicates_dropped),
        digest,
        error,
    })
}
