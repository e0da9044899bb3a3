use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::config::IngestConfig;
use crate::models::{ProgressState, Symbol};
use crate::negative_cache::NegativeCache;
use crate::progress::ProgressCursor;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SymbolFiles {
    pub symbol: String,
    pub csv_files: usize,
}

/// Snapshot of what a save root holds for the configured interval.
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub save_root: String,
    pub interval: String,
    pub progress: ProgressState,
    pub known_missing: usize,
    pub symbols: Vec<SymbolFiles>,
}

impl StatusReport {
    /// Counts CSVs for `symbols`, or for every symbol directory when `None`.
    pub fn collect(config: &IngestConfig, symbols: Option<&[Symbol]>) -> Self {
        let root = config.save_root();
        let names: Vec<String> = match symbols {
            Some(symbols) => symbols.iter().map(|s| s.as_str().to_string()).collect(),
            None => symbol_dirs(root),
        };
        let symbols = names
            .into_iter()
            .map(|symbol| {
                let csv_dir = root
                    .join(&symbol)
                    .join(config.interval.as_str())
                    .join("csv");
                SymbolFiles {
                    csv_files: count_csv(&csv_dir),
                    symbol,
                }
            })
            .collect();

        StatusReport {
            save_root: root.display().to_string(),
            interval: config.interval.to_string(),
            progress: ProgressCursor::new(config.progress_path()).load_raw(),
            known_missing: NegativeCache::new(config.negative_cache_path()).len(),
            symbols,
        }
    }

    pub fn total_files(&self) -> usize {
        self.symbols.iter().map(|s| s.csv_files).sum()
    }
}

fn symbol_dirs(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

fn count_csv(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "csv"))
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProgressUpdate;
    use chrono::NaiveDate;

    #[test]
    fn counts_files_progress_and_missing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig::new(dir.path());
        let csv_dir = dir.path().join("BTCUSDT").join("1m").join("csv");
        fs::create_dir_all(&csv_dir).unwrap();
        fs::write(csv_dir.join("BTCUSDT-1m-2024-03-01.csv"), "row").unwrap();
        fs::write(csv_dir.join("BTCUSDT-1m-2024-03-02.csv"), "row").unwrap();
        fs::create_dir_all(dir.path().join("ETHUSDT").join("1m").join("csv")).unwrap();

        NegativeCache::new(config.negative_cache_path()).record_missing("https://a/b.zip");
        ProgressCursor::new(config.progress_path())
            .save(ProgressUpdate::last_processed(
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            ))
            .unwrap();

        let report = StatusReport::collect(&config, None);
        assert_eq!(report.known_missing, 1);
        assert_eq!(report.total_files(), 2);
        assert_eq!(
            report.symbols,
            vec![
                SymbolFiles {
                    symbol: "BTCUSDT".into(),
                    csv_files: 2
                },
                SymbolFiles {
                    symbol: "ETHUSDT".into(),
                    csv_files: 0
                },
            ]
        );
        assert_eq!(
            report.progress.last_processed_date,
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
    }

    #[test]
    fn explicit_symbols_without_directories_report_zero() {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig::new(dir.path());
        let report = StatusReport::collect(&config, Some(&[Symbol::new("XRPUSDT")][..]));
        assert_eq!(report.symbols[0].csv_files, 0);
        assert_eq!(report.known_missing, 0);
    }
}
