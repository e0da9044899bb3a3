use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate};
use tracing::{debug, info, warn};

use crate::error::ProgressError;
use crate::models::{ProgressState, ProgressUpdate};

/// Read-modify-write access to `progress.json`.
///
/// `last_processed_date` only ever moves toward the past and
/// `started_date` only toward the present; updates that would move either
/// the other way are dropped.
pub struct ProgressCursor {
    path: PathBuf,
}

impl ProgressCursor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ProgressCursor { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored state with the fresh-window defaults filled in.
    pub fn load(&self, today: NaiveDate) -> ProgressState {
        let stored = self.load_raw();
        ProgressState {
            last_processed_date: stored
                .last_processed_date
                .or_else(|| today.checked_sub_days(Days::new(1))),
            started_date: stored.started_date.or(Some(today)),
        }
    }

    /// Stored state as-is; a missing or corrupt record reads as empty.
    pub fn load_raw(&self) -> ProgressState {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return ProgressState::default();
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "progress record unreadable, starting fresh");
                return ProgressState::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "progress record corrupt, starting fresh");
                ProgressState::default()
            }
        }
    }

    /// Merges `update` into the stored record and returns what was persisted.
    pub fn save(&self, update: ProgressUpdate) -> Result<ProgressState, ProgressError> {
        let current = self.load_raw();
        let mut next = current.clone();

        if let Some(day) = update.last_processed_date {
            match current.last_processed_date {
                Some(stored) if day > stored => {
                    debug!(%stored, requested = %day, "refusing to move last_processed_date forward");
                }
                _ => next.last_processed_date = Some(day),
            }
        }
        if let Some(day) = update.started_date {
            match current.started_date {
                Some(stored) if day < stored => {
                    debug!(%stored, requested = %day, "refusing to move started_date backward");
                }
                _ => next.started_date = Some(day),
            }
        }

        if next == current {
            return Ok(current);
        }
        self.write(&next)?;
        info!(
            last_processed_date = ?next.last_processed_date,
            started_date = ?next.started_date,
            "progress saved"
        );
        Ok(next)
    }

    fn write(&self, state: &ProgressState) -> Result<(), ProgressError> {
        let json = serde_json::to_string_pretty(state)?;
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let write_err = |source| ProgressError::Write {
            path: self.path.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(write_err)?;
        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        staged.write_all(json.as_bytes()).map_err(write_err)?;
        staged
            .persist(&self.path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }
}
