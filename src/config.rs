use anyhow::{Context, Result, bail};
use log::debug;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::HttpCatalogClient;
use crate::download::{DownloadOptions, HttpDownloader};
use crate::http::{HttpClient, RetryPolicy};
use crate::runtime::Runtime;

pub const DEFAULT_API_URL: &str = "https://rulesets.info";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const USER_AGENT: &str = concat!("ruleset-manager/", env!("RULESET_MANAGER_VERSION"));

pub const ENV_API_URL: &str = "RULESETS_API_URL";
pub const ENV_STORAGE_ROOT: &str = "RULESETS_STORAGE_ROOT";
pub const ENV_FETCH_TIMEOUT_SECS: &str = "RULESETS_FETCH_TIMEOUT_SECS";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Catalog API base, e.g. `https://rulesets.info`.
    pub api_url: String,
    /// Downloads land in `<storage_root>/rulesets`.
    pub storage_root: PathBuf,
    pub fetch_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub download: DownloadOptions,
}

impl Settings {
    pub fn new(api_url: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            api_url: api_url.into(),
            storage_root: storage_root.into(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::none(),
            download: DownloadOptions::default(),
        }
    }

    /// Reads settings from the environment, falling back to defaults.
    pub fn from_runtime<R: Runtime>(runtime: &R) -> Result<Self> {
        let api_url = non_empty_var(runtime, ENV_API_URL)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let storage_root = match non_empty_var(runtime, ENV_STORAGE_ROOT) {
            Some(root) => PathBuf::from(root),
            None => default_storage_root(runtime)?,
        };

        let mut settings = Self::new(api_url, storage_root);

        if let Some(secs) = non_empty_var(runtime, ENV_FETCH_TIMEOUT_SECS) {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid {} value {:?}", ENV_FETCH_TIMEOUT_SECS, secs))?;
            settings.fetch_timeout = Duration::from_secs(secs);
        }

        debug!("Using settings: {:?}", settings);
        Ok(settings)
    }

    pub fn catalog_url(&self) -> String {
        HttpCatalogClient::catalog_url(&self.api_url)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.storage_root.join("rulesets")
    }
}

fn non_empty_var<R: Runtime>(runtime: &R, key: &str) -> Option<String> {
    runtime.env_var(key).ok().filter(|value| !value.trim().is_empty())
}

fn default_storage_root<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    if let Some(data_dir) = runtime.data_dir() {
        return Ok(data_dir.join("ruleset-manager"));
    }
    if let Some(home) = runtime.home_dir() {
        return Ok(home.join(".ruleset-manager"));
    }
    bail!(
        "Could not determine a storage directory. Set {} to choose one.",
        ENV_STORAGE_ROOT
    )
}

/// The real collaborators, wired from [`Settings`].
pub struct Config<R: Runtime> {
    pub runtime: Arc<R>,
    pub settings: Settings,
    pub catalog: HttpCatalogClient,
    pub downloader: HttpDownloader<R>,
}

impl<R: Runtime> Config<R> {
    pub fn new(runtime: R) -> Result<Self> {
        let settings = Settings::from_runtime(&runtime)?;
        Self::with_settings(runtime, settings)
    }

    pub fn with_settings(runtime: R, settings: Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(settings.connect_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let runtime = Arc::new(runtime);
        let http_client = HttpClient::new(client);
        let catalog = HttpCatalogClient::new(http_client.clone(), settings.fetch_timeout);
        let downloader =
            HttpDownloader::new(http_client, runtime.clone(), settings.download.clone());

        Ok(Self {
            runtime,
            settings,
            catalog,
            downloader,
        })
    }
}
