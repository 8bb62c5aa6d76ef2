//! Ruleset downloads: cancellable streaming transfers with ordered progress
//! events.

mod task;
mod transfer;

use log::info;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::catalog::CatalogEntry;
use crate::http::{HttpClient, HttpError};
use crate::runtime::Runtime;

pub use task::{TaskEvent, TaskEvents, TaskHandle, TaskId, TaskSnapshot, TaskState};

use task::TaskShared;
use transfer::Transfer;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DownloadError {
    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    Io(String),

    #[error("server responded with HTTP {0}")]
    ServerError(StatusCode),
}

impl DownloadError {
    pub(crate) fn from_io(error: anyhow::Error) -> Self {
        DownloadError::Io(format!("{:#}", error))
    }
}

impl From<HttpError> for DownloadError {
    fn from(error: HttpError) -> Self {
        match error.status() {
            Some(status) => DownloadError::ServerError(status),
            None => DownloadError::Transport(error.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Leave `<file>.part` behind when a transfer is cancelled or fails.
    pub keep_partial: bool,
    /// A transfer fails when the response headers, or the next chunk of the
    /// body, take longer than this to arrive.
    pub idle_timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            keep_partial: false,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Name of the file a ruleset is saved as: the last path segment of its
/// download link, or `<slug>.bin` when the link has none.
pub fn file_name_for(entry: &CatalogEntry) -> String {
    let path = entry
        .download_url
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    path.rsplit('/')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.bin", entry.slug))
}

pub trait Downloader: Send + Sync {
    /// Starts downloading `entry` into `destination_dir` and returns
    /// immediately. The event stream begins with `TaskEvent::Queued`.
    ///
    /// Must be called from within a tokio runtime.
    fn start(&self, entry: Arc<CatalogEntry>, destination_dir: &Path) -> (TaskHandle, TaskEvents);
}

pub struct HttpDownloader<R: Runtime> {
    http: HttpClient,
    runtime: Arc<R>,
    options: DownloadOptions,
}

impl<R: Runtime> HttpDownloader<R> {
    pub fn new(http: HttpClient, runtime: Arc<R>, options: DownloadOptions) -> Self {
        Self {
            http,
            runtime,
            options,
        }
    }

    pub fn http_client(&self) -> &HttpClient {
        &self.http
    }
}

impl<R: Runtime + 'static> Downloader for HttpDownloader<R> {
    fn start(&self, entry: Arc<CatalogEntry>, destination_dir: &Path) -> (TaskHandle, TaskEvents) {
        let destination: PathBuf = destination_dir.join(file_name_for(&entry));
        let (shared, events) = TaskShared::new();

        info!(
            "Task {}: downloading {} to {:?}",
            shared.id(),
            entry.download_url,
            destination
        );

        let transfer = Transfer {
            http: self.http.clone(),
            runtime: self.runtime.clone(),
            options: self.options.clone(),
            url: entry.download_url.clone(),
            destination: destination.clone(),
            task: shared.clone(),
        };
        tokio::spawn(transfer.run());

        (TaskHandle::new(shared, entry, destination), events)
    }
}
