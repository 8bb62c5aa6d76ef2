use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use thiserror::Error;

use super::CatalogEntry;
use crate::http::{self, HttpClient, HttpError};

/// Path of the catalog listing, relative to the API base URL.
pub const CATALOG_PATH: &str = "/api/rulesets";

#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, timeout or non-success status.
    #[error(transparent)]
    Transport(HttpError),

    /// Malformed JSON or an entry that failed validation.
    #[error("malformed catalog: {0}")]
    Decode(String),

    #[error("catalog contains no rulesets")]
    Empty,
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(e) => http::is_retryable(e),
            FetchError::Decode(_) | FetchError::Empty => false,
        }
    }
}

impl From<HttpError> for FetchError {
    fn from(error: HttpError) -> Self {
        match error {
            HttpError::Decode { .. } => FetchError::Decode(error.to_string()),
            other => FetchError::Transport(other),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FetchCatalog: Send + Sync {
    /// Fetches and decodes the catalog at `url`. Performs exactly one request.
    async fn fetch(&self, url: &str) -> Result<Vec<CatalogEntry>, FetchError>;
}

pub struct HttpCatalogClient {
    http: HttpClient,
    timeout: Duration,
}

impl HttpCatalogClient {
    pub fn new(http: HttpClient, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Builds the catalog listing URL for an API base such as
    /// `https://rulesets.info`.
    pub fn catalog_url(base: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), CATALOG_PATH)
    }
}

#[async_trait]
impl FetchCatalog for HttpCatalogClient {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<CatalogEntry>, FetchError> {
        let entries: Vec<CatalogEntry> = self.http.get_json(url, self.timeout).await?;

        if entries.is_empty() {
            return Err(FetchError::Empty);
        }

        for entry in &entries {
            entry.validate().map_err(FetchError::Decode)?;
        }

        debug!("Decoded {} catalog entries from {}", entries.len(), url);
        Ok(entries)
    }
}
