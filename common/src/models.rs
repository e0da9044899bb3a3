use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Intervals published under `data/spot/daily/klines`.
pub const KNOWN_INTERVALS: &[&str] = &[
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d",
];

/// Trading pair as the archive names it, e.g. `BTCUSDT`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(value: impl Into<String>) -> Self {
        Symbol(value.into().trim().to_uppercase())
    }

    /// Appends `quote` unless the symbol already ends with it.
    pub fn with_quote(base: &str, quote: &str) -> Self {
        let base = base.trim().to_uppercase();
        let quote = quote.trim().to_uppercase();
        if quote.is_empty() || (base.ends_with(&quote) && base.len() > quote.len()) {
            Symbol(base)
        } else {
            Symbol(format!("{base}{quote}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Interval(String);

impl Interval {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let trimmed = value.trim();
        if KNOWN_INTERVALS.contains(&trimmed) {
            Ok(Interval(trimmed.to_string()))
        } else {
            Err(ConfigError::UnsupportedInterval(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval("1m".to_string())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One remote archive and the local CSV it decompresses into.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    pub symbol: Symbol,
    pub interval: Interval,
    pub day: NaiveDate,
}

impl ArchiveKey {
    pub fn new(symbol: Symbol, interval: Interval, day: NaiveDate) -> Self {
        ArchiveKey {
            symbol,
            interval,
            day,
        }
    }

    /// `{symbol}-{interval}-{yyyy}-{MM}-{dd}`
    pub fn stem(&self) -> String {
        format!(
            "{}-{}-{:04}-{:02}-{:02}",
            self.symbol,
            self.interval,
            self.day.year(),
            self.day.month(),
            self.day.day()
        )
    }

    pub fn archive_name(&self) -> String {
        format!("{}.zip", self.stem())
    }

    pub fn csv_name(&self) -> String {
        format!("{}.csv", self.stem())
    }

    pub fn remote_url(&self, base_url: &str) -> String {
        format!(
            "{}/data/spot/daily/klines/{}/{}/{}",
            base_url.trim_end_matches('/'),
            self.symbol,
            self.interval,
            self.archive_name()
        )
    }

    /// `{root}/{symbol}/{interval}`
    pub fn series_dir(&self, save_root: &Path) -> PathBuf {
        save_root
            .join(self.symbol.as_str())
            .join(self.interval.as_str())
    }

    pub fn csv_dir(&self, save_root: &Path) -> PathBuf {
        self.series_dir(save_root).join("csv")
    }

    pub fn zip_dir(&self, save_root: &Path) -> PathBuf {
        self.series_dir(save_root).join("zip")
    }

    pub fn csv_path(&self, save_root: &Path) -> PathBuf {
        self.csv_dir(save_root).join(self.csv_name())
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

/// Durable ingestion boundary, persisted as `progress.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_date: Option<NaiveDate>,
}

/// Partial update merged into the stored [`ProgressState`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub last_processed_date: Option<NaiveDate>,
    pub started_date: Option<NaiveDate>,
}

impl ProgressUpdate {
    pub fn last_processed(day: NaiveDate) -> Self {
        ProgressUpdate {
            last_processed_date: Some(day),
            started_date: None,
        }
    }

    pub fn started(day: NaiveDate) -> Self {
        ProgressUpdate {
            last_processed_date: None,
            started_date: Some(day),
        }
    }
}

/// Terminal result of one (symbol, interval, day) fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    AlreadyPresent,
    Missing,
    TransientFailure(String),
    LocalIoFailure(String),
}

impl FetchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Success => "success",
            FetchOutcome::AlreadyPresent => "already_present",
            FetchOutcome::Missing => "missing",
            FetchOutcome::TransientFailure(_) => "transient_failure",
            FetchOutcome::LocalIoFailure(_) => "local_io_failure",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FetchOutcome::TransientFailure(_) | FetchOutcome::LocalIoFailure(_)
        )
    }
}
