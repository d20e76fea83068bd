use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use flakeradar::config::{FlakeRadarConfig, LoggingConfig};
use flakeradar::detect::engine::FlakeEngine;
use flakeradar::report::ledger::{CsvLedger, MemorySink};
use flakeradar::{PipelineError, ScanSummary, Stage};

#[derive(Parser)]
#[command(
    name = "flakeradar",
    about = "Flaky-test detection over exported test-run history",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true, env = "FLAKERADAR_CONFIG")]
    config: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score exported runs and append one row per test to the overview CSV
    Scan {
        /// Overview CSV to create or append to
        #[arg(long, required_unless_present = "dry_run")]
        out: Option<PathBuf>,

        /// Print the rows instead of writing them
        #[arg(long)]
        dry_run: bool,

        /// Exported run JSON files, appended in the given order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Merge paginated export pages into one {"data": [...]} document
    Merge {
        /// Merged JSON output path
        #[arg(long)]
        out: PathBuf,

        /// Page files (merged in path order)
        #[arg(required = true)]
        pages: Vec<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn init_tracing(logging: &LoggingConfig, force_json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if force_json || logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = FlakeRadarConfig::resolve(cli.config.as_deref())
        .map_err(|e| PipelineError::new(Stage::Config, e))?;
    init_tracing(&config.logging, cli.log_json);

    match cli.command {
        Commands::Scan {
            out,
            dry_run,
            inputs,
        } => {
            tracing::info!(out = ?out, inputs = inputs.len(), dry_run, "Starting scan");
            let engine = FlakeEngine::new(&config.scoring, config.output.trend_style);

            // Score everything before touching the ledger.
            let batches = flakeradar::score_inputs(&inputs, &engine, &config.output).await?;

            match out.filter(|_| !dry_run) {
                Some(out) => {
                    let ledger = CsvLedger::open(&out)
                        .await
                        .map_err(|e| PipelineError::new(Stage::Write, e))?;
                    let total = flakeradar::write_batches(&batches, &ledger).await?;
                    print_summary(&batches, &total, Some(&out));
                }
                None => {
                    let sink = MemorySink::new();
                    let total = flakeradar::write_batches(&batches, &sink).await?;
                    print!("{}", sink.render().await);
                    print_summary(&batches, &total, None);
                }
            }
        }
        Commands::Merge { out, pages } => {
            tracing::info!(out = %out.display(), pages = pages.len(), "Merging pages");
            let summary = flakeradar::ingest::merge::merge_pages(&pages, &out)
                .await
                .map_err(|e| PipelineError::new(Stage::Merge, e))?;
            println!(
                "Merged {} pages -> {}; items={}",
                summary.pages,
                out.display(),
                summary.items
            );
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn print_summary(batches: &[flakeradar::ScoredBatch], total: &ScanSummary, out: Option<&Path>) {
    // Summary goes to stderr on dry runs so stdout stays valid CSV.
    let report = |line: String| {
        if out.is_some() {
            println!("{line}");
        } else {
            eprintln!("{line}");
        }
    };

    report(format!("{:<40} | {:>6} | {:>5} | {:>7}", "Input", "Tests", "Flaky", "Dropped"));
    report(format!("{:-<40}-|-{:->6}-|-{:->5}-|-{:->7}", "", "", "", ""));
    for batch in batches {
        report(format!(
            "{:<40} | {:>6} | {:>5} | {:>7}",
            batch.source.display(),
            batch.summary.tests_scored,
            batch.summary.tests_flaky,
            batch.summary.records_dropped
        ));
    }
    match out {
        Some(out) => report(format!(
            "[OK] {total}; appended {} rows to {}",
            total.rows_written,
            out.display()
        )),
        None => report(format!("[OK] {total} (dry run, nothing written)")),
    }
}
