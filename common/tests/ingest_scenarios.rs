use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use common::config::IngestConfig;
use common::fetcher::ArchiveFetcher;
use common::models::{ArchiveKey, Interval, ProgressState, ProgressUpdate, Symbol};
use common::negative_cache::NegativeCache;
use common::orchestrator::Ingestor;
use common::progress::ProgressCursor;
use common::test_helpers::{kline_zip, FakeArchive, FakeResponse};

const BASE: &str = "https://archive.test";

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn config(root: &Path, floor: NaiveDate) -> IngestConfig {
    let mut config = IngestConfig::new(root);
    config.archive_base_url = BASE.to_string();
    config.request_spacing = Duration::ZERO;
    config.retry_attempts = 0;
    config.concurrency = 4;
    config.floor_date = floor;
    config
}

fn ingestor(config: IngestConfig, archive: Arc<FakeArchive>) -> Ingestor {
    let cache = Arc::new(NegativeCache::new(config.negative_cache_path()));
    let fetcher = ArchiveFetcher::new(&config, archive, cache);
    Ingestor::new(config, fetcher)
}

fn key(symbol: &str, on: NaiveDate) -> ArchiveKey {
    ArchiveKey::new(Symbol::new(symbol), Interval::default(), on)
}

fn serve(archive: &FakeArchive, symbol: &str, on: NaiveDate) {
    let key = key(symbol, on);
    archive.respond(
        &key.remote_url(BASE),
        FakeResponse::Body(kline_zip(&key.csv_name(), 3)),
    );
}

fn symbols(names: &[&str]) -> Vec<Symbol> {
    names.iter().map(|name| Symbol::new(*name)).collect()
}

fn read_state(root: &Path) -> ProgressState {
    ProgressCursor::new(root.join("progress.json")).load_raw()
}

#[tokio::test]
async fn found_and_missing_archives_for_one_day() {
    let dir = tempfile::tempdir().unwrap();
    let target = day(2024, 3, 1);
    let archive = Arc::new(FakeArchive::default());
    serve(&archive, "BTC", target);

    let ingestor = ingestor(config(dir.path(), target), Arc::clone(&archive));
    let summary = ingestor.run(&symbols(&["BTC", "ETH"]), day(2024, 3, 2)).await;

    let backfill = summary.backfill.unwrap();
    assert_eq!(backfill.days, 1);
    assert_eq!(backfill.succeeded, 1);
    assert_eq!(backfill.missing, 1);
    assert_eq!(backfill.failures, 0);

    assert!(key("BTC", target).csv_path(dir.path()).exists());
    assert!(!key("ETH", target).csv_path(dir.path()).exists());

    let cached = fs::read_to_string(dir.path().join("offline_links.txt")).unwrap();
    assert_eq!(
        cached.lines().collect::<Vec<_>>(),
        vec!["https://archive.test/data/spot/daily/klines/ETH/1m/ETH-1m-2024-03-01.zip"]
    );
    assert_eq!(read_state(dir.path()).last_processed_date, Some(target));
}

#[tokio::test]
async fn rerun_makes_no_requests_and_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let target = day(2024, 3, 1);
    let today = day(2024, 3, 2);
    let archive = Arc::new(FakeArchive::default());
    serve(&archive, "BTC", target);
    let pairs = symbols(&["BTC", "ETH"]);

    let ingestor = ingestor(config(dir.path(), target), Arc::clone(&archive));
    ingestor.run(&pairs, today).await;
    let requests = archive.total_requests();
    let progress = fs::read_to_string(dir.path().join("progress.json")).unwrap();
    let cached = fs::read_to_string(dir.path().join("offline_links.txt")).unwrap();
    let csv = fs::read(key("BTC", target).csv_path(dir.path())).unwrap();

    let summary = ingestor.run(&pairs, today).await;
    assert!(summary.backfill.is_none());
    let report = ingestor.fetch_day(target, &pairs).await;

    assert_eq!(archive.total_requests(), requests);
    assert_eq!(report.already_present, 1);
    assert_eq!(report.missing, 1);
    assert_eq!(
        fs::read_to_string(dir.path().join("progress.json")).unwrap(),
        progress
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("offline_links.txt")).unwrap(),
        cached
    );
    assert_eq!(fs::read(key("BTC", target).csv_path(dir.path())).unwrap(), csv);
}

#[tokio::test]
async fn one_failing_symbol_does_not_block_the_day() {
    let dir = tempfile::tempdir().unwrap();
    let target = day(2024, 3, 1);
    let archive = Arc::new(FakeArchive::default());
    serve(&archive, "A", target);
    serve(&archive, "C", target);
    archive.respond(
        &key("B", target).remote_url(BASE),
        FakeResponse::TransportError,
    );

    let ingestor = ingestor(config(dir.path(), target), Arc::clone(&archive));
    let summary = ingestor.run(&symbols(&["A", "B", "C"]), day(2024, 3, 2)).await;

    let backfill = summary.backfill.unwrap();
    assert_eq!(backfill.succeeded, 2);
    assert_eq!(backfill.failures, 1);
    assert!(key("A", target).csv_path(dir.path()).exists());
    assert!(key("C", target).csv_path(dir.path()).exists());
    assert!(!dir.path().join("offline_links.txt").exists());
    assert_eq!(read_state(dir.path()).last_processed_date, Some(target));
}

#[tokio::test]
async fn every_symbol_of_a_day_finishes_before_the_cursor_moves() {
    let dir = tempfile::tempdir().unwrap();
    let newest = day(2024, 3, 2);
    let oldest = day(2024, 3, 1);
    let archive = Arc::new(FakeArchive::default());
    let names: Vec<String> = (0..12).map(|i| format!("S{i}")).collect();
    for name in &names {
        serve(&archive, name, newest);
        serve(&archive, name, oldest);
    }
    let pairs: Vec<Symbol> = names.iter().map(Symbol::new).collect();

    let mut config = config(dir.path(), oldest);
    config.concurrency = 3;
    let ingestor = ingestor(config, Arc::clone(&archive));
    let summary = ingestor.run(&pairs, day(2024, 3, 3)).await;

    let backfill = summary.backfill.unwrap();
    assert_eq!(backfill.days, 2);
    assert_eq!(backfill.first_day, Some(newest));
    assert_eq!(backfill.last_day, Some(oldest));
    assert_eq!(backfill.succeeded, 24);
    for name in &names {
        assert!(key(name, newest).csv_path(dir.path()).exists());
        assert!(key(name, oldest).csv_path(dir.path()).exists());
    }
    assert_eq!(read_state(dir.path()).last_processed_date, Some(oldest));
}

#[tokio::test]
async fn catch_up_then_backfill_from_the_recorded_window() {
    let dir = tempfile::tempdir().unwrap();
    let cursor = ProgressCursor::new(dir.path().join("progress.json"));
    cursor
        .save(ProgressUpdate {
            last_processed_date: Some(day(2024, 3, 1)),
            started_date: Some(day(2024, 3, 1)),
        })
        .unwrap();

    let archive = Arc::new(FakeArchive::default());
    let ingestor = ingestor(
        config(dir.path(), day(2024, 2, 28)),
        Arc::clone(&archive),
    );
    let summary = ingestor.run(&symbols(&["BTC"]), day(2024, 3, 5)).await;

    let catch_up = summary.catch_up.unwrap();
    assert_eq!(catch_up.first_day, Some(day(2024, 3, 2)));
    assert_eq!(catch_up.last_day, Some(day(2024, 3, 4)));
    assert_eq!(catch_up.days, 3);

    let backfill = summary.backfill.unwrap();
    assert_eq!(backfill.first_day, Some(day(2024, 2, 29)));
    assert_eq!(backfill.last_day, Some(day(2024, 2, 28)));

    assert_eq!(
        summary.progress,
        ProgressState {
            last_processed_date: Some(day(2024, 2, 28)),
            started_date: Some(day(2024, 3, 4)),
        }
    );
    // The recorded day itself is already complete.
    assert_eq!(
        archive.requests(&key("BTC", day(2024, 3, 1)).remote_url(BASE)),
        0
    );
}

#[tokio::test]
async fn backfill_at_the_floor_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let floor = day(2024, 3, 1);
    ProgressCursor::new(dir.path().join("progress.json"))
        .save(ProgressUpdate {
            last_processed_date: Some(floor),
            started_date: Some(day(2024, 3, 1)),
        })
        .unwrap();
    let archive = Arc::new(FakeArchive::default());
    let ingestor = ingestor(config(dir.path(), floor), Arc::clone(&archive));

    let summary = ingestor.run(&symbols(&["BTC"]), day(2024, 3, 2)).await;

    assert!(summary.catch_up.is_none());
    assert!(summary.backfill.is_none());
    assert_eq!(archive.total_requests(), 0);
}

#[tokio::test]
async fn outage_days_stay_open_for_the_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let floor = day(2024, 2, 25);
    let today = day(2024, 3, 2);
    let pairs = symbols(&["BTC", "ETH"]);
    let days: Vec<NaiveDate> = floor.iter_days().take_while(|d| *d < today).collect();
    let archive = Arc::new(FakeArchive::default());
    for on in &days {
        for name in ["BTC", "ETH"] {
            archive.respond(&key(name, *on).remote_url(BASE), FakeResponse::TransportError);
        }
    }

    let ingestor = ingestor(config(dir.path(), floor), Arc::clone(&archive));
    let summary = ingestor.run(&pairs, today).await;

    let backfill = summary.backfill.unwrap();
    assert!(backfill.aborted);
    assert_eq!(backfill.days, 1);
    assert_eq!(backfill.failures, 2);
    assert_eq!(summary.progress.last_processed_date, None);

    for on in &days {
        serve(&archive, "BTC", *on);
        serve(&archive, "ETH", *on);
    }
    let summary = ingestor.run(&pairs, today).await;

    let backfill = summary.backfill.unwrap();
    assert!(!backfill.aborted);
    assert_eq!(backfill.days, days.len());
    assert_eq!(summary.progress.last_processed_date, Some(floor));
    for on in &days {
        assert!(key("BTC", *on).csv_path(dir.path()).exists());
        assert!(key("ETH", *on).csv_path(dir.path()).exists());
    }
}

#[tokio::test]
async fn outage_mid_walk_keeps_the_last_good_day() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Arc::new(FakeArchive::default());
    serve(&archive, "BTC", day(2024, 3, 1));
    archive.respond(
        &key("BTC", day(2024, 2, 29)).remote_url(BASE),
        FakeResponse::Status(503),
    );

    let ingestor = ingestor(config(dir.path(), day(2024, 2, 27)), Arc::clone(&archive));
    let summary = ingestor.run(&symbols(&["BTC"]), day(2024, 3, 2)).await;

    let backfill = summary.backfill.unwrap();
    assert!(backfill.aborted);
    assert_eq!(backfill.last_day, Some(day(2024, 2, 29)));
    assert_eq!(summary.progress.last_processed_date, Some(day(2024, 3, 1)));
    assert_eq!(
        archive.requests(&key("BTC", day(2024, 2, 28)).remote_url(BASE)),
        0
    );
}

#[tokio::test]
async fn open_requests_never_exceed_the_concurrency_limit() {
    let dir = tempfile::tempdir().unwrap();
    let target = day(2024, 3, 1);
    let archive = Arc::new(FakeArchive::with_latency(Duration::from_millis(20)));
    let names: Vec<String> = (0..40).map(|i| format!("C{i}")).collect();
    let pairs: Vec<Symbol> = names.iter().map(Symbol::new).collect();

    let mut config = config(dir.path(), target);
    config.concurrency = 3;
    let ingestor = ingestor(config, Arc::clone(&archive));
    let report = ingestor.fetch_day(target, &pairs).await;

    assert_eq!(report.total(), 40);
    assert_eq!(archive.total_requests(), 40);
    assert_eq!(archive.peak_in_flight(), 3);
}

#[tokio::test]
async fn local_io_failure_is_isolated_to_its_symbol() {
    let dir = tempfile::tempdir().unwrap();
    let target = day(2024, 3, 1);
    let archive = Arc::new(FakeArchive::default());
    serve(&archive, "A", target);
    serve(&archive, "X", target);
    serve(&archive, "C", target);
    // A plain file where X's csv directory belongs.
    let blocked = key("X", target).csv_dir(dir.path());
    fs::create_dir_all(blocked.parent().unwrap()).unwrap();
    fs::write(&blocked, "not a directory").unwrap();

    let ingestor = ingestor(config(dir.path(), target), Arc::clone(&archive));
    let pairs = symbols(&["A", "X", "C"]);
    let report = ingestor.fetch_day(target, &pairs).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.local_io_failures, 1);
    assert_eq!(report.failed_symbols, vec![Symbol::new("X")]);
    assert!(key("A", target).csv_path(dir.path()).exists());
    assert!(key("C", target).csv_path(dir.path()).exists());

    let summary = ingestor.run(&pairs, day(2024, 3, 2)).await;
    assert_eq!(summary.backfill.unwrap().failures, 1);
    assert_eq!(summary.progress.last_processed_date, Some(target));
}

#[tokio::test]
async fn panicking_task_is_reported_against_its_symbol() {
    let dir = tempfile::tempdir().unwrap();
    let target = day(2024, 3, 1);
    let archive = Arc::new(FakeArchive::default());
    serve(&archive, "A", target);
    archive.respond(&key("P", target).remote_url(BASE), FakeResponse::Panic);

    let ingestor = ingestor(config(dir.path(), target), Arc::clone(&archive));
    let report = ingestor.fetch_day(target, &symbols(&["A", "P"])).await;

    assert_eq!(report.total(), 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.transient_failures, 1);
    assert_eq!(report.failed_symbols, vec![Symbol::new("P")]);
}

#[tokio::test]
async fn day_limit_bounds_the_backfill() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Arc::new(FakeArchive::default());
    let mut config = config(dir.path(), day(2017, 1, 1));
    config.max_days = Some(2);
    let ingestor = ingestor(config, Arc::clone(&archive));

    let summary = ingestor.run(&symbols(&["BTC"]), day(2024, 3, 2)).await;

    assert!(summary.catch_up.is_none());
    assert_eq!(summary.backfill.unwrap().days, 2);
    assert_eq!(
        summary.progress,
        ProgressState {
            last_processed_date: Some(day(2024, 2, 29)),
            started_date: Some(day(2024, 3, 1)),
        }
    );
}

#[tokio::test]
async fn empty_symbol_list_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Arc::new(FakeArchive::default());
    let ingestor = ingestor(config(dir.path(), day(2024, 1, 1)), Arc::clone(&archive));

    let summary = ingestor.run(&[], day(2024, 3, 2)).await;

    assert_eq!(summary.symbols, 0);
    assert!(summary.catch_up.is_none());
    assert!(summary.backfill.is_none());
    assert_eq!(archive.total_requests(), 0);
    assert!(!dir.path().join("progress.json").exists());
}

#[tokio::test]
async fn single_day_fetch_leaves_the_cursor_alone() {
    let dir = tempfile::tempdir().unwrap();
    let target = day(2023, 6, 15);
    let archive = Arc::new(FakeArchive::default());
    serve(&archive, "BTC", target);
    let ingestor = ingestor(config(dir.path(), day(2017, 1, 1)), Arc::clone(&archive));

    let report = ingestor.fetch_day(target, &symbols(&["BTC", "ETH"])).await;

    assert_eq!(report.day, Some(target));
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.missing, 1);
    assert!(!dir.path().join("progress.json").exists());
}
