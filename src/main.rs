//! claims-eda-checks: CLI entry point.
//!
//! Runs the EDA check catalogue against the claims snapshot.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use claims_eda_checks::checks::Area;
use claims_eda_checks::dataset::{find_data_dir, DataConfig, Dataset, DATA_DIR_ENV};
use claims_eda_checks::expectations::Expectations;
use claims_eda_checks::profile::{Profile, ProfileView};
use claims_eda_checks::runner::{run_catalogue, write_report, Selection};
use claims_eda_checks::types::{CheckResult, Report, Summary};

#[derive(Parser)]
#[command(name = "claims-eda-checks")]
#[command(about = "Regression checks for the pharmacy claims EDA findings")]
#[command(version)]
struct Cli {
    /// Run every check (headless mode with colored output).
    #[arg(long)]
    all: bool,

    /// Only run checks in this area (repeatable).
    #[arg(short, long, value_enum)]
    area: Vec<Area>,

    /// Only run checks whose `area::name` id contains this text.
    #[arg(short, long)]
    filter: Option<String>,

    /// Directory holding the claims and drug files (or set `CLAIMS_EDA_DATA_DIR`).
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Expectations YAML for another snapshot (default: embedded 2021 snapshot).
    #[arg(short, long)]
    expectations: Option<PathBuf>,

    /// Write results as JSON.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the KPI overview.
    #[arg(long)]
    profile: bool,

    /// Compute the profile over every claim, flagged NDCs included.
    #[arg(long)]
    include_flagged: bool,

    /// Debug logging (`RUST_LOG` takes precedence).
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let data_dir = cli.data_dir.clone().or_else(find_data_dir).ok_or_else(|| {
        anyhow::anyhow!("Data directory not found. Set {DATA_DIR_ENV} or use --data-dir")
    })?;

    let expectations = load_expectations(cli.expectations.as_deref())?;
    let config = DataConfig {
        flagged_ndcs: vec![expectations.sentinel.ndc],
        ..DataConfig::with_data_dir(&data_dir)
    };

    println!("{}", "claims-eda-checks".bold());
    println!("  Claims: {}", config.claims_path().display());
    println!("  Drugs: {}", config.drugs_path().display());
    println!(
        "  Expectations: {}",
        cli.expectations
            .as_deref()
            .map_or_else(|| "2021 snapshot (embedded)".to_string(), |p| p.display().to_string())
    );
    println!();

    let dataset = Dataset::load(&config).context("Failed to load dataset")?;
    println!(
        "Loaded {} claims ({} after excluding flagged NDCs), {} reference rows",
        dataset.claims().len(),
        dataset.real_claims().len(),
        dataset.drugs().len()
    );
    println!();

    if cli.profile {
        let view = if cli.include_flagged {
            ProfileView::Raw
        } else {
            ProfileView::Real
        };
        print_profile(&Profile::compute(&dataset, view));
    }

    let selection = Selection {
        areas: cli.area.clone(),
        filter: cli.filter.clone(),
    };

    if cli.all || !selection.areas.is_empty() || selection.filter.is_some() {
        run_all_mode(&cli, &config, &dataset, &expectations, &selection)?;
    } else if !cli.profile {
        println!("Use --all to run all checks");
    }

    Ok(())
}

fn load_expectations(path: Option<&Path>) -> anyhow::Result<Expectations> {
    match path {
        Some(path) => Expectations::from_path(path)
            .with_context(|| format!("Failed to load expectations: {}", path.display())),
        None => Expectations::snapshot_2021().context("Embedded expectations are invalid"),
    }
}

fn run_all_mode(
    cli: &Cli,
    config: &DataConfig,
    dataset: &Dataset,
    expectations: &Expectations,
    selection: &Selection,
) -> anyhow::Result<()> {
    let start = Instant::now();

    println!("{}", "Running checks...".cyan());

    let results = run_catalogue(dataset, expectations, selection);
    let mut current_area = "";
    for result in &results {
        if result.is_skip() {
            continue;
        }
        let area = result.name().split("::").next().unwrap_or_default();
        if area != current_area {
            println!("{}", area.bold());
            current_area = area;
        }
        print_result(result);
    }

    let elapsed = start.elapsed();
    let summary = Summary::from_results(&results);

    // Summary
    println!();
    println!("{}", "=".repeat(60));

    if summary.ran() == 0 {
        println!(
            "  {} no checks matched the selection ({} skipped)",
            "FAIL".red(),
            summary.skipped
        );
    } else if summary.is_success() {
        println!(
            "  {} {} passed, {} skipped in {:.2}s",
            "PASS".green(),
            summary.passed.to_string().green(),
            summary.skipped,
            elapsed.as_secs_f64()
        );
    } else {
        println!(
            "  {} {} passed, {} failed, {} errors, {} skipped in {:.2}s",
            "FAIL".red(),
            summary.passed,
            summary.failed.to_string().red(),
            summary.errors.to_string().red(),
            summary.skipped,
            elapsed.as_secs_f64()
        );
    }

    println!("{}", "=".repeat(60));

    if let Some(path) = &cli.report {
        let report = Report {
            claims_file: config.claims_path().display().to_string(),
            drugs_file: config.drugs_path().display().to_string(),
            areas: selection.areas(),
            summary,
            elapsed_secs: elapsed.as_secs_f64(),
            results,
        };
        write_report(&report, path)?;
        println!("Report written to {}", path.display());
    }

    if !summary.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_result(result: &CheckResult) {
    match result {
        CheckResult::Pass { name, details } => {
            println!("  {} {} {}", "✓".green(), name, details.dimmed());
        }
        CheckResult::Fail { name, reason } => {
            println!("  {} {}", "✗".red(), name.red());
            println!("      {reason}");
        }
        CheckResult::Error { name, error } => {
            println!("  {} {} (error)", "✗".red(), name.red());
            println!("      {error}");
        }
        CheckResult::Skip { name, reason } => {
            println!("  {} {} ({})", "○".yellow(), name.dimmed(), reason.dimmed());
        }
    }
}

fn fmt_rate(rate: Option<f64>) -> String {
    rate.map_or_else(|| "n/a".to_string(), |r| format!("{r:.2}%"))
}

fn print_profile(profile: &Profile) {
    let k = &profile.kpis;
    let view = match profile.view {
        ProfileView::Real => "flagged NDCs excluded",
        ProfileView::Raw => "all claims",
    };

    println!("{} ({view})", "Overview".cyan());
    println!("  Rows: {}", k.total_rows);
    println!("  Net claims: {}", k.net_claims);
    println!("  Reversal rate: {}", fmt_rate(k.reversal_rate));
    println!(
        "  Adjudicated: {} of {} ({})",
        k.adjudication.matched,
        k.adjudication.total,
        fmt_rate(k.adjudication.pct())
    );
    println!("  Unique NDCs: {}", k.unique_ndcs);
    println!();

    println!("  {:<8}{:>10}{:>10}{:>10}", "Month", "Incurred", "Reversed", "Net");
    for m in &profile.monthly {
        println!("  {:<8}{:>10}{:>10}{:>10}", m.month, m.incurred, m.reversed, m.net);
    }
    println!();

    println!("  {:<10}{:>10}{:>12}{:>10}", "Formulary", "Rows", "Net", "Reversal");
    for f in &profile.formularies {
        println!(
            "  {:<10}{:>10}{:>12}{:>10}",
            f.formulary.as_str(),
            f.rows,
            f.net_claims,
            fmt_rate(f.reversal_rate)
        );
    }
    println!();

    println!("  {:<8}{:>10}{:>12}{:>8}", "State", "Rows", "Net", "Groups");
    for s in &profile.states {
        println!("  {:<8}{:>10}{:>12}{:>8}", s.state, s.rows, s.net_claims, s.groups);
    }
    println!();
}
