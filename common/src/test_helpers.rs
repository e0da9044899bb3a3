//! In-memory archive fakes shared by unit and integration tests.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::client::{ArchiveClient, DownloadStatus};
use crate::error::FetchError;

#[derive(Clone, Debug)]
pub enum FakeResponse {
    Body(Vec<u8>),
    NotFound,
    Status(u16),
    TransportError,
    /// The download task panics.
    Panic,
}

/// Serves canned responses by URL and counts every request.
///
/// URLs without a canned response answer 404.
#[derive(Default)]
pub struct FakeArchive {
    responses: Mutex<HashMap<String, FakeResponse>>,
    requests: Mutex<HashMap<String, usize>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeArchive {
    /// Every request stays open for `latency` before answering.
    pub fn with_latency(latency: Duration) -> Self {
        FakeArchive {
            latency: Some(latency),
            ..FakeArchive::default()
        }
    }

    /// Most requests that were open at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn respond(&self, url: &str, response: FakeResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn requests(&self, url: &str) -> usize {
        self.requests.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ArchiveClient for FakeArchive {
    async fn download(&self, url: &str, dest: &Path) -> Result<DownloadStatus, FetchError> {
        *self
            .requests
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(FakeResponse::NotFound);

        let open = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(open, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let result = answer(response, dest).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

async fn answer(response: FakeResponse, dest: &Path) -> Result<DownloadStatus, FetchError> {
    match response {
        FakeResponse::Body(body) => {
            tokio::fs::write(dest, &body)
                .await
                .map_err(|err| FetchError::io(dest, err))?;
            Ok(DownloadStatus::Saved {
                bytes: body.len() as u64,
            })
        }
        FakeResponse::NotFound => Ok(DownloadStatus::NotFound),
        FakeResponse::Status(status) => Ok(DownloadStatus::Rejected(status)),
        FakeResponse::TransportError => {
            Err(FetchError::Transport("connection reset by peer".to_string()))
        }
        FakeResponse::Panic => panic!("archive client blew up"),
    }
}

/// Zip holding one CSV named `entry` with `rows` twelve-column kline rows.
pub fn kline_zip(entry: &str, rows: usize) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(entry, SimpleFileOptions::default())
        .unwrap();
    let open_time = 1_709_251_200_000u64;
    for row in 0..rows as u64 {
        let start = open_time + row * 60_000;
        writeln!(
            writer,
            "{start},61130.99,61160.00,61120.01,61155.00,12.5,{},764000.1,640,6.2,379000.5,0",
            start + 59_999
        )
        .unwrap();
    }
    writer.finish().unwrap().into_inner()
}
