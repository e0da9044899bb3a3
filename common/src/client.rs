use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{ConfigError, FetchError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Body streamed into the destination file.
    Saved { bytes: u64 },
    NotFound,
    Rejected(u16),
}

/// The one network call the pipeline makes.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// GETs `url`; on success writes the body to `dest`, truncating it first.
    async fn download(&self, url: &str, dest: &Path) -> Result<DownloadStatus, FetchError>;
}

pub struct HttpArchiveClient {
    client: Client,
}

impl HttpArchiveClient {
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;
        Ok(HttpArchiveClient { client })
    }
}

#[async_trait]
impl ArchiveClient for HttpArchiveClient {
    async fn download(&self, url: &str, dest: &Path) -> Result<DownloadStatus, FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(DownloadStatus::NotFound);
        }
        if !status.is_success() {
            return Ok(DownloadStatus::Rejected(status.as_u16()));
        }

        let mut file = File::create(dest)
            .await
            .map_err(|err| FetchError::io(dest, err))?;
        let mut bytes = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|err| FetchError::io(dest, err))?;
            bytes += chunk.len() as u64;
        }
        file.flush().await.map_err(|err| FetchError::io(dest, err))?;
        Ok(DownloadStatus::Saved { bytes })
    }
}
