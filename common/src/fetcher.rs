use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::client::{ArchiveClient, DownloadStatus, HttpArchiveClient};
use crate::config::IngestConfig;
use crate::error::{ConfigError, FailureKind, FetchError};
use crate::models::{ArchiveKey, FetchOutcome};
use crate::negative_cache::NegativeCache;
use crate::pacer::RequestPacer;

enum Fetched {
    Extracted(Vec<PathBuf>),
    NotFound,
}

/// Downloads one daily archive and unpacks it next to its siblings.
///
/// The CSV on disk is the completion marker: once it exists the key is never
/// requested again, whatever the progress cursor says.
pub struct ArchiveFetcher {
    save_root: PathBuf,
    base_url: String,
    client: Arc<dyn ArchiveClient>,
    pacer: Arc<RequestPacer>,
    negative_cache: Arc<NegativeCache>,
    retry_attempts: usize,
    retry_base_delay: Duration,
}

impl ArchiveFetcher {
    pub fn new(
        config: &IngestConfig,
        client: Arc<dyn ArchiveClient>,
        negative_cache: Arc<NegativeCache>,
    ) -> Self {
        ArchiveFetcher {
            save_root: config.save_root.clone(),
            base_url: config.archive_base_url.clone(),
            client,
            pacer: Arc::new(RequestPacer::new(config.request_spacing)),
            negative_cache,
            retry_attempts: config.retry_attempts,
            retry_base_delay: config.retry_base_delay,
        }
    }

    /// Fetcher backed by the real HTTP client and the on-disk negative cache.
    pub fn from_config(config: &IngestConfig) -> Result<Self, ConfigError> {
        let client = Arc::new(HttpArchiveClient::new(config.request_timeout)?);
        let negative_cache = Arc::new(NegativeCache::new(config.negative_cache_path()));
        Ok(Self::new(config, client, negative_cache))
    }

    pub fn negative_cache(&self) -> &NegativeCache {
        &self.negative_cache
    }

    pub async fn fetch(&self, key: &ArchiveKey) -> FetchOutcome {
        let csv_path = key.csv_path(&self.save_root);
        if csv_path.exists() {
            debug!(archive = %key, "already extracted");
            return FetchOutcome::AlreadyPresent;
        }

        let url = key.remote_url(&self.base_url);
        if self.negative_cache.is_known_missing(&url) {
            debug!(archive = %key, "known missing upstream");
            return FetchOutcome::Missing;
        }

        match self.download_and_extract(key, &url, &csv_path).await {
            Ok(Fetched::Extracted(files)) => {
                info!(archive = %key, files = files.len(), "archive extracted");
                FetchOutcome::Success
            }
            Ok(Fetched::NotFound) => {
                info!(archive = %key, url = %url, "archive not found upstream");
                self.negative_cache.record_missing(&url);
                FetchOutcome::Missing
            }
            Err(err) => match err.kind() {
                FailureKind::Transient => {
                    warn!(archive = %key, error = %err, "fetch failed, will retry on a later run");
                    FetchOutcome::TransientFailure(err.to_string())
                }
                FailureKind::LocalIo => {
                    warn!(archive = %key, error = %err, "local io failure");
                    FetchOutcome::LocalIoFailure(err.to_string())
                }
            },
        }
    }

    async fn download_and_extract(
        &self,
        key: &ArchiveKey,
        url: &str,
        csv_path: &Path,
    ) -> Result<Fetched, FetchError> {
        let zip_dir = key.zip_dir(&self.save_root);
        let csv_dir = key.csv_dir(&self.save_root);
        fs::create_dir_all(&zip_dir).map_err(|err| FetchError::io(&zip_dir, err))?;
        fs::create_dir_all(&csv_dir).map_err(|err| FetchError::io(&csv_dir, err))?;

        let archive = tempfile::Builder::new()
            .prefix(&format!("{}.", key.stem()))
            .suffix(".zip.part")
            .tempfile_in(&zip_dir)
            .map_err(|err| FetchError::io(&zip_dir, err))?;

        debug!(archive = %key, url, "downloading");
        match self.download_with_retry(url, archive.path()).await? {
            DownloadStatus::NotFound => return Ok(Fetched::NotFound),
            DownloadStatus::Rejected(status) => return Err(FetchError::Status(status)),
            DownloadStatus::Saved { bytes } => debug!(archive = %key, bytes, "archive saved"),
        }

        let expected = csv_path.to_path_buf();
        let files = tokio::task::spawn_blocking(move || {
            let files = extract_archive(archive.path(), &csv_dir)?;
            if !expected.exists() {
                let name = expected
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                return Err(FetchError::MissingEntry(name));
            }
            Ok(files)
        })
        .await
        .map_err(|err| FetchError::Join(err.to_string()))??;

        Ok(Fetched::Extracted(files))
    }

    /// Retries transport errors only; every attempt waits on the pacer.
    async fn download_with_retry(
        &self,
        url: &str,
        dest: &Path,
    ) -> Result<DownloadStatus, FetchError> {
        let factor = (self.retry_base_delay.as_millis() as u64 / 2).max(1);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(Duration::from_secs(30))
            .take(self.retry_attempts);

        let pacer = &self.pacer;
        let client = &self.client;
        RetryIf::start(
            strategy,
            move || async move {
                pacer.wait().await;
                client.download(url, dest).await
            },
            |err: &FetchError| {
                let retry = matches!(err, FetchError::Transport(_));
                if retry {
                    debug!(url, error = %err, "transport error, retrying");
                }
                retry
            },
        )
        .await
    }
}

const EXTRACT_CHUNK: usize = 64 * 1024;

/// Unpacks every entry of `archive` under `dest_dir`.
///
/// Each file is written to a temp file in its final directory and renamed
/// into place, so a partially written CSV never appears under its real name.
pub fn extract_archive(archive: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, FetchError> {
    let file = fs::File::open(archive).map_err(|err| FetchError::io(archive, err))?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;
    let mut written = Vec::with_capacity(zip.len());
    let mut buf = vec![0u8; EXTRACT_CHUNK];

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name().map(|path| path.to_path_buf()) else {
            warn!(entry = entry.name(), "skipping archive entry with unsafe path");
            continue;
        };
        let target = dest_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| FetchError::io(&target, err))?;
            continue;
        }

        let parent = target.parent().unwrap_or(dest_dir);
        fs::create_dir_all(parent).map_err(|err| FetchError::io(parent, err))?;
        let mut staged =
            tempfile::NamedTempFile::new_in(parent).map_err(|err| FetchError::io(parent, err))?;

        // Read errors mean a bad archive, write errors a local fault.
        loop {
            let read = entry.read(&mut buf).map_err(zip::result::ZipError::Io)?;
            if read == 0 {
                break;
            }
            staged
                .write_all(&buf[..read])
                .map_err(|err| FetchError::io(staged.path(), err))?;
        }
        staged
            .persist(&target)
            .map_err(|err| FetchError::io(&target, err.error))?;
        written.push(target);
    }

    Ok(written)
}
