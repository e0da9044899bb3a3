use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use common::config::{default_concurrency, default_floor_date, IngestConfig, DEFAULT_ARCHIVE_BASE};
use common::error::ConfigError;
use common::models::{Interval, Symbol};
use common::symbols::{
    to_pairs, FileSymbols, PostgresSymbols, StaticSymbols, SymbolSource, DEFAULT_QUOTE,
};

#[derive(Parser)]
#[command(name = "ingester")]
#[command(about = "Resumable Binance Vision daily kline ingestion.", version)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Catch up on recent days, then backfill history toward the floor date.
    Run {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        options: SourceOptions,
        #[arg(long)]
        json: bool,
    },
    /// Fetch a single day for every symbol without moving the progress cursor.
    Day {
        #[arg(long)]
        date: NaiveDate,
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        options: SourceOptions,
        #[arg(long)]
        json: bool,
    },
    /// Summarise the save root: cursor, cached misses and CSV counts.
    Status {
        /// Restrict the report to these symbols instead of every directory.
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        #[arg(long, default_value = DEFAULT_QUOTE)]
        quote: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Clone, Debug)]
pub struct Settings {
    /// Root of the local archive tree.
    #[arg(long, env = "DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,
    #[arg(long, default_value = "1m", global = true)]
    pub interval: String,
    /// Symbols fetched in parallel per day.
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,
    /// Minimum gap between request starts across all workers.
    #[arg(long, default_value_t = 1000, global = true)]
    pub spacing_ms: u64,
    #[arg(long, default_value_t = 10, global = true)]
    pub timeout_secs: u64,
    /// Extra attempts after a transport error.
    #[arg(long, default_value_t = 2, global = true)]
    pub retries: usize,
    #[arg(long, default_value_t = 500, global = true)]
    pub retry_delay_ms: u64,
    #[arg(long, global = true)]
    pub floor_date: Option<NaiveDate>,
    /// Stop each phase after this many days.
    #[arg(long, global = true)]
    pub max_days: Option<usize>,
    #[arg(long, default_value = DEFAULT_ARCHIVE_BASE, global = true)]
    pub base_url: String,
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
    /// `text` or `json`.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: String,
}

impl Settings {
    pub fn to_config(&self) -> Result<IngestConfig, ConfigError> {
        let save_root = self.data_dir.clone().ok_or(ConfigError::MissingSaveRoot)?;
        let config = IngestConfig {
            save_root,
            archive_base_url: self.base_url.clone(),
            interval: Interval::parse(&self.interval)?,
            concurrency: self.concurrency.unwrap_or_else(default_concurrency),
            request_spacing: Duration::from_millis(self.spacing_ms),
            request_timeout: Duration::from_secs(self.timeout_secs),
            retry_attempts: self.retries,
            retry_base_delay: Duration::from_millis(self.retry_delay_ms),
            floor_date: self.floor_date.unwrap_or_else(default_floor_date),
            max_days: self.max_days,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Exactly one symbol source per invocation.
#[derive(Args, Clone, Debug)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    /// Comma separated base assets or pairs, e.g. `BTC,ETH`.
    #[arg(long, value_delimiter = ',')]
    pub symbols: Option<Vec<String>>,
    /// File with one base asset or pair per line.
    #[arg(long)]
    pub symbols_file: Option<PathBuf>,
    /// Postgres database holding the `cryptos` table.
    #[arg(long)]
    pub db_url: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct SourceOptions {
    /// Include disabled assets when reading from the database.
    #[arg(long, requires = "db_url")]
    pub all_symbols: bool,
    #[arg(long, default_value = DEFAULT_QUOTE)]
    pub quote: String,
}

impl SourceArgs {
    pub fn source(&self, options: &SourceOptions) -> Box<dyn SymbolSource> {
        let quote = options.quote.as_str();
        if let Some(entries) = &self.symbols {
            Box::new(StaticSymbols::new(entries.clone(), quote))
        } else if let Some(path) = &self.symbols_file {
            Box::new(FileSymbols::new(path, quote))
        } else if let Some(db_url) = &self.db_url {
            Box::new(PostgresSymbols::new(db_url, !options.all_symbols, quote))
        } else {
            Box::new(StaticSymbols::new(Vec::new(), quote))
        }
    }
}

pub fn status_symbols(entries: &[String], quote: &str) -> Option<Vec<Symbol>> {
    if entries.is_empty() {
        None
    } else {
        Some(to_pairs(entries.iter().map(String::as_str), quote))
    }
}
