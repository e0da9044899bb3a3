//! Resumable ingestion of daily kline archives from the Binance Vision
//! mirror into a local CSV tree.

pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod negative_cache;
pub mod orchestrator;
pub mod pacer;
pub mod progress;
pub mod scheduler;
pub mod status;
pub mod symbols;
#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use config::IngestConfig;
pub use fetcher::ArchiveFetcher;
pub use models::{ArchiveKey, FetchOutcome, Interval, ProgressState, Symbol};
pub use orchestrator::{Ingestor, RunSummary};
