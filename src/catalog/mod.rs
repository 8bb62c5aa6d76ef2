//! Remote ruleset catalog: wire model and client.

mod client;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use client::{CATALOG_PATH, FetchCatalog, FetchError, HttpCatalogClient};

#[cfg(test)]
pub use client::MockFetchCatalog;

/// A ruleset as listed by the catalog endpoint.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: u64,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "icon", default)]
    pub icon_url: String,
    #[serde(rename = "light_icon", default)]
    pub light_icon_url: String,
    #[serde(rename = "owner_detail")]
    pub owner: OwnerDetail,
    #[serde(default)]
    pub verified: bool,
    #[serde(rename = "archive", default)]
    pub archived: bool,
    #[serde(rename = "direct_download_link", default)]
    pub download_url: String,
    pub can_download: bool,
    pub status: StatusInfo,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct OwnerDetail {
    pub id: u64,
    pub user: User,
    #[serde(default)]
    pub image: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub email: String,
}

/// Release information of the latest published version.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct StatusInfo {
    pub latest_version: String,
    #[serde(default)]
    pub latest_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pre_release: bool,
    #[serde(default)]
    pub changelog: String,
    #[serde(rename = "file_size", default)]
    pub file_size_bytes: u64,
    #[serde(default)]
    pub playable: String,
}

impl CatalogEntry {
    /// Checks the fields every consumer relies on.
    ///
    /// A download link is only required when the entry can be downloaded;
    /// the catalog publishes archived entries without one.
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            ("name", &self.name),
            ("slug", &self.slug),
            ("status.latest_version", &self.status.latest_version),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(format!("entry {} has an empty `{}`", self.id, field));
            }
        }

        if self.can_download && self.download_url.trim().is_empty() {
            return Err(format!(
                "entry {} ({}) is downloadable but has no `direct_download_link`",
                self.id, self.name
            ));
        }

        Ok(())
    }
}
