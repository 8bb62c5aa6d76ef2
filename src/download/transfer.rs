//! Streaming transfer driving one task from `Active` to a terminal state.

use log::{debug, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::task::{TaskShared, TaskState};
use super::{DownloadError, DownloadOptions};
use crate::http::HttpClient;
use crate::runtime::Runtime;

enum Outcome {
    Finished(u64),
    Cancelled,
}

pub(crate) struct Transfer<R: Runtime> {
    pub(crate) http: HttpClient,
    pub(crate) runtime: Arc<R>,
    pub(crate) options: DownloadOptions,
    pub(crate) url: String,
    pub(crate) destination: PathBuf,
    pub(crate) task: Arc<TaskShared>,
}

/// `<destination>.part`, where bytes land until the stream closes.
pub(crate) fn part_path_for(destination: &Path) -> PathBuf {
    let mut part = destination.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

impl<R: Runtime> Transfer<R> {
    #[tracing::instrument(skip(self))]
    pub(crate) async fn run(self) {
        let part_path = part_path_for(&self.destination);

        match self.stream_to(&part_path).await {
            Ok(Outcome::Finished(bytes)) => {
                self.task.complete(|| {
                    self.runtime
                        .rename(&part_path, &self.destination)
                        .map_err(|e| DownloadError::from_io(e).to_string())
                });
                if self.task.snapshot().state == TaskState::Completed {
                    debug!("Wrote {} bytes to {:?}", bytes, self.destination);
                } else {
                    // Cancelled after the last byte arrived, or the rename failed.
                    self.discard_partial(&part_path);
                }
            }
            Ok(Outcome::Cancelled) => {
                debug!("Transfer of {} stopped after cancellation", self.url);
                self.discard_partial(&part_path);
            }
            Err(e) => {
                self.discard_partial(&part_path);
                self.task.fail(e.to_string());
            }
        }
    }

    async fn stream_to(&self, part_path: &Path) -> Result<Outcome, DownloadError> {
        if !self.task.activate() {
            return Ok(Outcome::Cancelled);
        }
        let token = self.task.cancellation_token();

        if let Some(parent) = self.destination.parent() {
            self.runtime
                .create_dir_all(parent)
                .map_err(DownloadError::from_io)?;
        }

        let mut response = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(Outcome::Cancelled),
            response = self.http.get_stream(&self.url, self.options.idle_timeout) => response?,
        };

        let total = response.content_length().filter(|len| *len > 0);
        let mut writer = self
            .runtime
            .create_file(part_path)
            .map_err(DownloadError::from_io)?;
        let mut received: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(Outcome::Cancelled),
                chunk = HttpClient::next_chunk(&self.url, &mut response, self.options.idle_timeout) => chunk?,
            };
            let Some(chunk) = chunk else {
                break;
            };

            // Writes stay on the worker thread: ruleset assemblies are small
            // and `block_in_place` would rule out current-thread runtimes.
            writer
                .write_all(&chunk)
                .map_err(|e| DownloadError::Io(format!("Failed to write {:?}: {}", part_path, e)))?;
            received += chunk.len() as u64;

            // Unknown length: progress stays indeterminate.
            if let Some(total) = total {
                self.task.progress(received as f32 / total as f32);
            }
        }

        writer
            .flush()
            .map_err(|e| DownloadError::Io(format!("Failed to flush {:?}: {}", part_path, e)))?;
        drop(writer);

        // hyper already fails a short HTTP/1.1 body while reading; this
        // catches servers that end the stream early without an error.
        if let Some(total) = total {
            if received != total {
                return Err(DownloadError::Transport(format!(
                    "incomplete download: expected {} bytes, received {}",
                    total, received
                )));
            }
        }

        Ok(Outcome::Finished(received))
    }

    fn discard_partial(&self, part_path: &Path) {
        if self.options.keep_partial || !self.runtime.exists(part_path) {
            return;
        }
        if let Err(e) = self.runtime.remove_file(part_path) {
            warn!("Failed to remove partial download {:?}: {:#}", part_path, e);
        }
    }
}
