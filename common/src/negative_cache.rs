use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

/// Append-only list of archive URLs confirmed absent upstream.
///
/// Storage faults never block ingestion: an unreadable file reads as empty
/// and a failed append is only logged.
pub struct NegativeCache {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl NegativeCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        NegativeCache {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_known_missing(&self, url: &str) -> bool {
        match self.read_lines() {
            Ok(lines) => lines.iter().any(|line| line == url),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "negative cache unreadable, treating as empty");
                false
            }
        }
    }

    pub fn record_missing(&self, url: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        match self.append(url) {
            Ok(()) => debug!(url, "recorded missing archive"),
            Err(err) => {
                warn!(path = %self.path.display(), url, error = %err, "failed to record missing archive")
            }
        }
    }

    /// Distinct entries currently recorded.
    pub fn len(&self) -> usize {
        let mut lines = self.read_lines().unwrap_or_default();
        lines.sort();
        lines.dedup();
        lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_lines(&self) -> io::Result<Vec<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn append(&self, url: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(format!("{url}\n").as_bytes())
    }
}
