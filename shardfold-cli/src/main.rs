//! Shardfold CLI: consolidation batches and raw-source audits.
//!
//! Commands:
//! - `merge-monthly`: fold closed months of daily shards into monthly artifacts
//! - `merge-yearly`: fold past years of monthly shards into yearly artifacts
//! - `merge-all`: both tiers over every configured dataset
//! - `validate`: audit a yearly artifact against its raw day files
//! - `validate-months`: audit every monthly artifact in a year directory
//!
//! Window-level failures are logged and summarized; the exit code is non-zero
//! only for bad config, an unreachable data root, or bad arguments.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use shardfold_core::{AuditError, AuditReport, DatasetKind, Tier};
use shardfold_runner::preflight;
use shardfold_runner::{BatchSummary, ConsolidationConfig, Orchestrator, WindowOutcome};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "shardfold",
    about = "Shardfold: consolidate market-data shards into monthly and yearly archives"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BatchArgs {
    /// Data root holding one directory per dataset. Overrides the config file.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Report what would be consolidated without writing or deleting anything.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Evaluate the safety gate as of this date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    today: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consolidate daily shards of closed months into `YYYY-MM` artifacts.
    MergeMonthly {
        /// Dataset: KR-1m, KR-1d or US-5m.
        dataset: DatasetKind,
        #[command(flatten)]
        args: BatchArgs,
    },
    /// Consolidate monthly shards of past years into `YYYY` artifacts.
    MergeYearly {
        /// Dataset: KR-1m, KR-1d or US-5m.
        dataset: DatasetKind,
        #[command(flatten)]
        args: BatchArgs,
    },
    /// Run the monthly then the yearly tier over every configured dataset.
    MergeAll {
        #[command(flatten)]
        args: BatchArgs,
    },
    /// Audit a yearly artifact against the raw day files in its year directory.
    Validate {
        dataset: DatasetKind,
        /// Year directory holding the raw `.txt` files and `<year>.parquet`.
        year_dir: PathBuf,
        /// Year key, e.g. 2020.
        year_key: String,
    },
    /// Audit each monthly artifact in a year directory against its raw day files.
    ValidateMonths {
        dataset: DatasetKind,
        year_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MergeMonthly { dataset, args } => run_tier(Tier::Monthly, dataset, &args),
        Commands::MergeYearly { dataset, args } => run_tier(Tier::Yearly, dataset, &args),
        Commands::MergeAll { args } => run_all(&args),
        Commands::Validate {
            dataset,
            year_dir,
            year_key,
        } => run_validate(dataset, year_dir, &year_key),
        Commands::ValidateMonths { dataset, year_dir } => run_validate_months(dataset, year_dir),
    }
}

fn load_config(args: &BatchArgs) -> Result<ConsolidationConfig> {
    let config = match &args.config {
        Some(path) => ConsolidationConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ConsolidationConfig::default(),
    };
    let config = match &args.root {
        Some(root) => config.with_data_root(root),
        None => config,
    };
    debug!(root = %config.data_root.display(), datasets = ?config.datasets, "config loaded");
    Ok(config)
}

fn build_orchestrator(
    tier: Tier,
    config: ConsolidationConfig,
    args: &BatchArgs,
) -> Result<Orchestrator> {
    let orchestrator = Orchestrator::new(tier, config).with_dry_run(args.dry_run);
    Ok(match args.today.as_deref() {
        Some(s) => {
            let today = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("--today must be YYYY-MM-DD, got '{s}'"))?;
            orchestrator.with_today(today)
        }
        None => orchestrator,
    })
}

fn run_tier(tier: Tier, dataset: DatasetKind, args: &BatchArgs) -> Result<()> {
    let config = load_config(args)?;
    preflight::check(&config).context("preflight failed")?;

    let summary = build_orchestrator(tier, config, args)?
        .run_dataset(dataset)
        .with_context(|| format!("{tier} consolidation of {dataset}"))?;
    print_summary(&summary);
    Ok(())
}

fn run_all(args: &BatchArgs) -> Result<()> {
    let config = load_config(args)?;
    preflight::check(&config).context("preflight failed")?;

    for tier in [Tier::Monthly, Tier::Yearly] {
        let summaries = build_orchestrator(tier, config.clone(), args)?
            .run_all()
            .with_context(|| format!("{tier} consolidation"))?;
        for summary in &summaries {
            print_summary(summary);
        }
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    println!("{summary}");
    for report in &summary.windows {
        match &report.outcome {
            WindowOutcome::Planned => {
                println!("  [PLAN] {} ({} files)", report.window, report.inputs.len())
            }
            WindowOutcome::RolledBack { kind, reason, .. } => {
                println!("  [ROLLBACK] {} ({kind}): {reason}", report.window)
            }
            WindowOutcome::Committed { leftover, .. } if *leftover > 0 => println!(
                "  [CLEANUP] {}: {leftover} input(s) left behind; the next run absorbs them",
                report.window
            ),
            _ => {}
        }
    }
    for (dir, reason) in &summary.unreadable_years {
        println!("  [ERROR] {}: {reason}", dir.display());
    }
}

fn run_validate(dataset: DatasetKind, year_dir: PathBuf, year_key: &str) -> Result<()> {
    match shardfold_core::validate_year(dataset, &year_dir, year_key) {
        Ok(report) => print_audit(&report),
        Err(e) => report_audit_error(e)?,
    }
    Ok(())
}

fn run_validate_months(dataset: DatasetKind, year_dir: PathBuf) -> Result<()> {
    match shardfold_core::validate_months(dataset, &year_dir) {
        Ok(reports) if reports.is_empty() => {
            println!("[WARN] no monthly artifacts with raw sources in {}", year_dir.display())
        }
        Ok(reports) => reports.iter().for_each(print_audit),
        Err(e) => report_audit_error(e)?,
    }
    Ok(())
}

fn print_audit(report: &AuditReport) {
    println!("{report}");
}

/// Bad arguments fail the command; anything about the data itself is a finding.
fn report_audit_error(e: AuditError) -> Result<()> {
    match e {
        AuditError::BadYearKey(_) | AuditError::List { .. } => Err(e.into()),
        other => {
            println!("[ERROR] {other}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_merge_monthly_with_flags() {
        let cli = Cli::try_parse_from([
            "shardfold",
            "merge-monthly",
            "kr-1d",
            "--root",
            "/srv/data",
            "--dry-run",
            "--today",
            "2020-02-06",
        ])
        .unwrap();

        match cli.command {
            Commands::MergeMonthly { dataset, args } => {
                assert_eq!(dataset, DatasetKind::Kr1d);
                assert_eq!(args.root, Some(PathBuf::from("/srv/data")));
                assert!(args.dry_run);
                assert_eq!(args.today.as_deref(), Some("2020-02-06"));
            }
            _ => panic!("expected merge-monthly"),
        }
    }

    #[test]
    fn parses_validate_and_rejects_unknown_dataset() {
        let cli = Cli::try_parse_from(["shardfold", "validate", "US-5m", "data/US-5m/2020", "2020"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Validate { dataset: DatasetKind::Us5m, .. }
        ));

        assert!(Cli::try_parse_from(["shardfold", "merge-yearly", "jp-1m"]).is_err());
    }

    #[test]
    fn root_flag_overrides_config() {
        let args = BatchArgs {
            root: Some(PathBuf::from("/tmp/market")),
            config: None,
            dry_run: false,
            today: None,
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.data_root, PathBuf::from("/tmp/market"));
        let bad_today = BatchArgs {
            today: Some("02/06/2020".into()),
            ..args
        };
        assert!(build_orchestrator(Tier::Monthly, config, &bad_today).is_err());
    }
}
