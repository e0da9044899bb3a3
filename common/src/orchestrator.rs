use std::fs;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::error::ConfigError;
use crate::fetcher::ArchiveFetcher;
use crate::models::{ProgressState, ProgressUpdate, Symbol};
use crate::progress::ProgressCursor;
use crate::scheduler::{DayRange, DayReport, DayScheduler, Phase, WalkReport};

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub symbols: usize,
    pub catch_up: Option<WalkReport>,
    pub backfill: Option<WalkReport>,
    pub progress: ProgressState,
}

/// Runs the catch-up pass and then the backfill pass over one save root.
pub struct Ingestor {
    config: IngestConfig,
    cursor: Arc<ProgressCursor>,
    scheduler: DayScheduler,
}

impl Ingestor {
    pub fn new(config: IngestConfig, fetcher: ArchiveFetcher) -> Self {
        let cursor = Arc::new(ProgressCursor::new(config.progress_path()));
        let scheduler = DayScheduler::new(
            Arc::new(fetcher),
            Arc::clone(&cursor),
            config.interval.clone(),
            config.concurrency,
        );
        Ingestor {
            config,
            cursor,
            scheduler,
        }
    }

    /// Validates the config, creates the save root and wires the HTTP fetcher.
    pub fn from_config(config: IngestConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        fs::create_dir_all(&config.save_root).map_err(|source| {
            ConfigError::SaveRootUnavailable {
                path: config.save_root.clone(),
                source,
            }
        })?;
        let fetcher = ArchiveFetcher::from_config(&config)?;
        Ok(Self::new(config, fetcher))
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn cursor(&self) -> &ProgressCursor {
        &self.cursor
    }

    pub async fn run(&self, symbols: &[Symbol], today: NaiveDate) -> RunSummary {
        let mut summary = RunSummary {
            symbols: symbols.len(),
            ..RunSummary::default()
        };
        if symbols.is_empty() {
            info!("no symbols to ingest");
            summary.progress = self.cursor.load_raw();
            return summary;
        }

        let Some(yesterday) = today.pred_opt() else {
            warn!(%today, "no day before today, nothing to ingest");
            return summary;
        };

        let stored = self.cursor.load_raw();

        // `started_date` is the newest fully walked day, so catch-up resumes after it.
        summary.catch_up = match stored.started_date {
            Some(started) if started < yesterday => {
                match started.succ_opt().and_then(|from| DayRange::new(from, yesterday)) {
                    Some(range) => {
                        info!(from = %range.oldest(), to = %yesterday, "catching up on recent days");
                        Some(
                            self.scheduler
                                .walk(range, symbols, Phase::CatchUp, self.config.max_days)
                                .await,
                        )
                    }
                    None => None,
                }
            }
            _ => None,
        };

        if stored.started_date.is_none() {
            if let Err(err) = self.cursor.save(ProgressUpdate::started(yesterday)) {
                warn!(error = %err, "failed to record start date");
            }
        }

        // A stored `last_processed_date` is already complete; start the day before it.
        let upper = match stored.last_processed_date {
            Some(done) => done.pred_opt(),
            None => self.cursor.load(today).last_processed_date,
        };
        summary.backfill = match upper.and_then(|upper| DayRange::new(self.config.floor_date, upper)) {
            Some(range) => {
                info!(from = %range.newest(), floor = %self.config.floor_date, "backfilling history");
                Some(
                    self.scheduler
                        .walk(range, symbols, Phase::Backfill, self.config.max_days)
                        .await,
                )
            }
            None => {
                info!(floor = %self.config.floor_date, "backfill already reached the floor date");
                None
            }
        };

        summary.progress = self.cursor.load_raw();
        info!(
            last_processed_date = ?summary.progress.last_processed_date,
            started_date = ?summary.progress.started_date,
            "ingestion run finished"
        );
        summary
    }

    /// Fetches one day for all symbols without moving the cursor.
    pub async fn fetch_day(&self, day: NaiveDate, symbols: &[Symbol]) -> DayReport {
        self.scheduler.fetch_symbols(day, symbols).await
    }
}
