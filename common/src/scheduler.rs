use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::fetcher::ArchiveFetcher;
use crate::models::{ArchiveKey, FetchOutcome, Interval, ProgressUpdate, Symbol};
use crate::progress::ProgressCursor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Oldest day first.
    Forward,
    /// Newest day first.
    Backward,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    CatchUp,
    Backfill,
}

impl Phase {
    pub fn direction(self) -> Direction {
        match self {
            Phase::CatchUp => Direction::Forward,
            Phase::Backfill => Direction::Backward,
        }
    }

    /// Cursor field a completed day advances in this phase.
    pub fn cursor_update(self, day: NaiveDate) -> ProgressUpdate {
        match self {
            Phase::CatchUp => ProgressUpdate::started(day),
            Phase::Backfill => ProgressUpdate::last_processed(day),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::CatchUp => f.write_str("catch-up"),
            Phase::Backfill => f.write_str("backfill"),
        }
    }
}

/// Inclusive, non-empty range of calendar days.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayRange {
    oldest: NaiveDate,
    newest: NaiveDate,
}

impl DayRange {
    pub fn new(oldest: NaiveDate, newest: NaiveDate) -> Option<Self> {
        (oldest <= newest).then_some(DayRange { oldest, newest })
    }

    pub fn oldest(&self) -> NaiveDate {
        self.oldest
    }

    pub fn newest(&self) -> NaiveDate {
        self.newest
    }

    pub fn len(&self) -> usize {
        (self.newest - self.oldest).num_days() as usize + 1
    }

    pub fn days(&self, direction: Direction) -> Box<dyn Iterator<Item = NaiveDate> + Send> {
        let DayRange { oldest, newest } = *self;
        match direction {
            Direction::Forward => Box::new(
                std::iter::successors(Some(oldest), |day| day.succ_opt())
                    .take_while(move |day| *day <= newest),
            ),
            Direction::Backward => Box::new(
                std::iter::successors(Some(newest), |day| day.pred_opt())
                    .take_while(move |day| *day >= oldest),
            ),
        }
    }
}

/// Aggregated outcomes of every symbol task for one day.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DayReport {
    pub day: Option<NaiveDate>,
    pub succeeded: usize,
    pub already_present: usize,
    pub missing: usize,
    pub transient_failures: usize,
    pub local_io_failures: usize,
    pub failed_symbols: Vec<Symbol>,
}

impl DayReport {
    pub fn new(day: NaiveDate) -> Self {
        DayReport {
            day: Some(day),
            ..DayReport::default()
        }
    }

    pub fn record(&mut self, symbol: Symbol, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Success => self.succeeded += 1,
            FetchOutcome::AlreadyPresent => self.already_present += 1,
            FetchOutcome::Missing => self.missing += 1,
            FetchOutcome::TransientFailure(_) => {
                self.transient_failures += 1;
                self.failed_symbols.push(symbol);
            }
            FetchOutcome::LocalIoFailure(_) => {
                self.local_io_failures += 1;
                self.failed_symbols.push(symbol);
            }
        }
    }

    /// Symbols that reached a terminal outcome.
    pub fn total(&self) -> usize {
        self.succeeded
            + self.already_present
            + self.missing
            + self.transient_failures
            + self.local_io_failures
    }

    pub fn failures(&self) -> usize {
        self.transient_failures + self.local_io_failures
    }

    /// True when symbols were attempted and none reached a settled outcome,
    /// e.g. during a network outage.
    pub fn all_failed(&self) -> bool {
        self.total() > 0 && self.failures() == self.total()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WalkReport {
    pub days: usize,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
    pub succeeded: usize,
    pub already_present: usize,
    pub missing: usize,
    pub failures: usize,
    /// Walk stopped on a day where every symbol failed; that day and the
    /// rest of the range are left for the next run.
    pub aborted: bool,
}

impl WalkReport {
    fn absorb(&mut self, day: &DayReport) {
        self.days += 1;
        if self.first_day.is_none() {
            self.first_day = day.day;
        }
        self.last_day = day.day;
        self.succeeded += day.succeeded;
        self.already_present += day.already_present;
        self.missing += day.missing;
        self.failures += day.failures();
    }
}

/// Fans one day's symbols out over a bounded pool and owns cursor advances.
pub struct DayScheduler {
    fetcher: Arc<ArchiveFetcher>,
    cursor: Arc<ProgressCursor>,
    interval: Interval,
    concurrency: usize,
}

impl DayScheduler {
    pub fn new(
        fetcher: Arc<ArchiveFetcher>,
        cursor: Arc<ProgressCursor>,
        interval: Interval,
        concurrency: usize,
    ) -> Self {
        DayScheduler {
            fetcher,
            cursor,
            interval,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetches every symbol for `day`, then advances the phase's cursor field
    /// unless every symbol failed.
    pub async fn process_day(&self, day: NaiveDate, symbols: &[Symbol], phase: Phase) -> DayReport {
        let report = self.fetch_symbols(day, symbols).await;
        if report.all_failed() {
            warn!(%phase, %day, failed = report.failures(), "every symbol failed, progress not advanced");
            return report;
        }
        if let Err(err) = self.cursor.save(phase.cursor_update(day)) {
            warn!(%phase, %day, error = %err, "failed to save progress, day will be rechecked on resume");
        }
        report
    }

    /// Runs one task per symbol behind the semaphore and waits for all of them.
    pub async fn fetch_symbols(&self, day: NaiveDate, symbols: &[Symbol]) -> DayReport {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut pending: Vec<Symbol> = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let fetcher = Arc::clone(&self.fetcher);
            let key = ArchiveKey::new(symbol.clone(), self.interval.clone(), day);
            pending.push(symbol.clone());
            tasks.spawn(async move {
                let outcome = fetcher.fetch(&key).await;
                drop(permit);
                (key.symbol, outcome)
            });
        }

        let mut report = DayReport::new(day);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((symbol, outcome)) => {
                    if let Some(index) = pending.iter().position(|s| *s == symbol) {
                        pending.swap_remove(index);
                    }
                    report.record(symbol, &outcome);
                }
                Err(err) => {
                    warn!(%day, error = %err, "fetch task aborted");
                    report.transient_failures += 1;
                }
            }
        }
        // Whatever is still pending belongs to a task that never returned.
        report.failed_symbols.extend(pending);
        report
    }

    /// Walks `range` in the phase's direction, one barrier per day.
    pub async fn walk(
        &self,
        range: DayRange,
        symbols: &[Symbol],
        phase: Phase,
        max_days: Option<usize>,
    ) -> WalkReport {
        let mut walk = WalkReport::default();
        info!(
            %phase,
            oldest = %range.oldest(),
            newest = %range.newest(),
            days = range.len(),
            symbols = symbols.len(),
            "walking day range"
        );

        for (index, day) in range.days(phase.direction()).enumerate() {
            if max_days.is_some_and(|limit| index >= limit) {
                info!(%phase, limit = index, "day limit reached");
                break;
            }
            let report = self.process_day(day, symbols, phase).await;
            if report.all_failed() {
                walk.absorb(&report);
                walk.aborted = true;
                warn!(%phase, %day, "stopping walk, day will be retried on the next run");
                break;
            }
            info!(
                %phase,
                %day,
                succeeded = report.succeeded,
                already_present = report.already_present,
                missing = report.missing,
                failed = report.failures(),
                days_done = index + 1,
                "day processed"
            );
            walk.absorb(&report);
        }
        walk
    }
}
