mod cli;
mod obs;

use anyhow::{Context, Result};
use clap::Parser;
use common::models::{ProgressState, Symbol};
use common::orchestrator::{Ingestor, RunSummary};
use common::scheduler::{DayReport, WalkReport};
use common::status::StatusReport;
use common::symbols::SymbolSource;
use serde::Serialize;
use tracing::info;

use crate::cli::{status_symbols, Cli, Commands};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    obs::init_tracing(&cli.settings.log_level, &cli.settings.log_format)?;
    let config = cli.settings.to_config().context("invalid configuration")?;

    match cli.command {
        Commands::Run {
            source,
            options,
            json,
        } => {
            let symbols = load_symbols(source.source(&options).as_ref()).await?;
            let ingestor = Ingestor::from_config(config).context("failed to set up ingestion")?;
            let today = chrono::Utc::now().date_naive();
            let summary = ingestor.run(&symbols, today).await;
            if json {
                print_json(&summary)?;
            } else {
                print_summary(&summary);
            }
        }
        Commands::Day {
            date,
            source,
            options,
            json,
        } => {
            let symbols = load_symbols(source.source(&options).as_ref()).await?;
            let ingestor = Ingestor::from_config(config).context("failed to set up ingestion")?;
            let report = ingestor.fetch_day(date, &symbols).await;
            if json {
                print_json(&report)?;
            } else {
                print_day(&report);
            }
        }
        Commands::Status {
            symbols,
            quote,
            json,
        } => {
            let symbols = status_symbols(&symbols, &quote);
            let report = StatusReport::collect(&config, symbols.as_deref());
            if json {
                print_json(&report)?;
            } else {
                print_status(&report);
            }
        }
    }
    Ok(())
}

async fn load_symbols(source: &dyn SymbolSource) -> Result<Vec<Symbol>> {
    let symbols = source.load().await.context("failed to load symbols")?;
    info!(count = symbols.len(), "symbols loaded");
    Ok(symbols)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{out}");
    Ok(())
}

fn print_walk(label: &str, walk: Option<&WalkReport>) {
    let Some(walk) = walk else {
        println!("{label}: skipped");
        return;
    };
    let span = match (walk.first_day, walk.last_day) {
        (Some(first), Some(last)) => format!("{first} -> {last}"),
        _ => "-".to_string(),
    };
    println!(
        "{label}: {} days ({span}), {} fetched, {} present, {} missing, {} failed",
        walk.days, walk.succeeded, walk.already_present, walk.missing, walk.failures
    );
}

fn print_summary(summary: &RunSummary) {
    println!("symbols: {}", summary.symbols);
    print_walk("catch-up", summary.catch_up.as_ref());
    print_walk("backfill", summary.backfill.as_ref());
    print_progress(&summary.progress);
}

fn print_progress(progress: &ProgressState) {
    let show = |day: Option<chrono::NaiveDate>| day.map_or("-".to_string(), |d| d.to_string());
    println!(
        "progress: last_processed_date={} started_date={}",
        show(progress.last_processed_date),
        show(progress.started_date)
    );
}

fn print_day(report: &DayReport) {
    if let Some(day) = report.day {
        println!("day: {day}");
    }
    println!(
        "{} fetched, {} present, {} missing, {} transient, {} local io",
        report.succeeded,
        report.already_present,
        report.missing,
        report.transient_failures,
        report.local_io_failures
    );
    if !report.failed_symbols.is_empty() {
        let failed: Vec<&str> = report.failed_symbols.iter().map(Symbol::as_str).collect();
        println!("failed: {}", failed.join(","));
    }
}

fn print_status(report: &StatusReport) {
    println!("save root: {}", report.save_root);
    println!("interval: {}", report.interval);
    print_progress(&report.progress);
    println!("known missing archives: {}", report.known_missing);
    println!(
        "csv files: {} across {} symbols",
        report.total_files(),
        report.symbols.len()
    );
    for entry in &report.symbols {
        println!("  {:<16} {}", entry.symbol, entry.csv_files);
    }
}
