use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;

use crate::error::ConfigError;
use crate::models::Interval;

pub const DEFAULT_ARCHIVE_BASE: &str = "https://data.binance.vision";
pub const PROGRESS_FILE: &str = "progress.json";
pub const NEGATIVE_CACHE_FILE: &str = "offline_links.txt";

/// Everything the pipeline needs, threaded through constructors.
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub save_root: PathBuf,
    pub archive_base_url: String,
    pub interval: Interval,
    pub concurrency: usize,
    /// Minimum spacing between request starts, across all workers.
    pub request_spacing: Duration,
    pub request_timeout: Duration,
    /// Extra attempts after a transport error. Status responses are never retried.
    pub retry_attempts: usize,
    pub retry_base_delay: Duration,
    /// Oldest day the backfill walks down to.
    pub floor_date: NaiveDate,
    /// Upper bound on days walked per phase; `None` walks the whole range.
    pub max_days: Option<usize>,
}

impl IngestConfig {
    pub fn new(save_root: impl Into<PathBuf>) -> Self {
        IngestConfig {
            save_root: save_root.into(),
            archive_base_url: DEFAULT_ARCHIVE_BASE.to_string(),
            interval: Interval::default(),
            concurrency: default_concurrency(),
            request_spacing: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            retry_attempts: 2,
            retry_base_delay: Duration::from_millis(500),
            floor_date: default_floor_date(),
            max_days: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.save_root.as_os_str().is_empty() {
            return Err(ConfigError::MissingSaveRoot);
        }
        if self.save_root.exists() && !self.save_root.is_dir() {
            return Err(ConfigError::SaveRootNotDirectory(self.save_root.clone()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        let base = self.archive_base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(self.archive_base_url.clone()));
        }
        Ok(())
    }

    pub fn progress_path(&self) -> PathBuf {
        self.save_root.join(PROGRESS_FILE)
    }

    pub fn negative_cache_path(&self) -> PathBuf {
        self.save_root.join(NEGATIVE_CACHE_FILE)
    }

    pub fn save_root(&self) -> &Path {
        &self.save_root
    }
}

/// Twice the available cores, independent of how many symbols are listed.
pub fn default_concurrency() -> usize {
    (num_cpus::get() * 2).max(1)
}

pub fn default_floor_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, 1, 1).expect("static date is valid")
}
