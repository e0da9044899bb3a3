use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("save root is not set (pass --data-dir or set DATA_DIR)")]
    MissingSaveRoot,
    #[error("save root {0} exists but is not a directory")]
    SaveRootNotDirectory(PathBuf),
    #[error("cannot create save root {path}: {source}")]
    SaveRootUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unsupported kline interval: {0}")]
    UnsupportedInterval(String),
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("invalid archive base url: {0}")]
    InvalidBaseUrl(String),
    #[error("failed to build http client: {0}")]
    HttpClient(String),
}

/// Failure of a single archive fetch. Never aborts a day.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("archive responded with status {0}")]
    Status(u16),
    #[error("local io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("archive did not contain {0}")]
    MissingEntry(String),
    #[error("extraction task failed: {0}")]
    Join(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    LocalIo,
}

impl FetchError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FetchError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Io { .. } => FailureKind::LocalIo,
            _ => FailureKind::Transient,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("failed to write progress record {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode progress record: {0}")]
    Encode(#[from] serde_json::Error),
}
