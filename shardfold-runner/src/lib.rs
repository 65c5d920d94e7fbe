//! Shardfold Runner: batch orchestration on top of `shardfold-core`.
//!
//! - TOML configuration with defaults for every field
//! - Preflight checks run before any orchestrator is built
//! - Per-tier orchestrator driving each window to commit or rollback
//! - Append-only JSONL job ledger per dataset root

pub mod config;
pub mod ledger;
pub mod orchestrator;
pub mod preflight;

pub use config::{ConfigError, ConsolidationConfig};
pub use ledger::{JobLedger, LedgerEntry, LedgerOutcome, LEDGER_FILE};
pub use orchestrator::{
    BatchSummary, JobState, Orchestrator, RunError, WindowOutcome, WindowReport,
};
pub use preflight::{Preflight, PreflightError};
