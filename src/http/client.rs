//! Thin wrapper over `reqwest` with typed failures.

use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single HTTP exchange.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl HttpError {
    fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            HttpError::Timeout {
                url: url.to_string(),
            }
        } else {
            HttpError::Transport {
                url: url.to_string(),
                source,
            }
        }
    }

    /// HTTP status for `Status` failures.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// HTTP client shared by every network operation of the crate.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Performs a GET request and deserializes the JSON body.
    ///
    /// `timeout` bounds the whole exchange, body included. There is no retry
    /// here; callers wrap this in [`super::with_retry`] when they want one.
    #[tracing::instrument(skip(self))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<T, HttpError> {
        debug!("GET JSON from {}...", url);

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| HttpError::from_reqwest(url, e))?;

        let response = check_status(url, response)?;

        let body = response
            .bytes()
            .await
            .map_err(|e| HttpError::from_reqwest(url, e))?;

        serde_json::from_slice(&body).map_err(|source| HttpError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Starts a streaming GET. The returned response has a success status;
    /// read it with [`HttpClient::next_chunk`].
    ///
    /// `header_timeout` bounds the wait for the response headers only, so a
    /// large body is never cut short by it.
    #[tracing::instrument(skip(self))]
    pub async fn get_stream(
        &self,
        url: &str,
        header_timeout: Duration,
    ) -> Result<Response, HttpError> {
        debug!("Opening download stream from {}...", url);

        let response = match tokio::time::timeout(header_timeout, self.client.get(url).send()).await
        {
            Ok(response) => response.map_err(|e| HttpError::from_reqwest(url, e))?,
            Err(_) => {
                return Err(HttpError::Timeout {
                    url: url.to_string(),
                });
            }
        };

        check_status(url, response)
    }

    /// Reads the next body chunk, failing with `Timeout` when nothing arrives
    /// within `idle_timeout`.
    pub async fn next_chunk(
        url: &str,
        response: &mut Response,
        idle_timeout: Duration,
    ) -> Result<Option<bytes::Bytes>, HttpError> {
        match tokio::time::timeout(idle_timeout, response.chunk()).await {
            Ok(chunk) => chunk.map_err(|e| HttpError::from_reqwest(url, e)),
            Err(_) => Err(HttpError::Timeout {
                url: url.to_string(),
            }),
        }
    }
}

fn check_status(url: &str, response: Response) -> Result<Response, HttpError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(HttpError::Status {
            url: url.to_string(),
            status,
        })
    }
}
