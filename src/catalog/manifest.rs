//! Explicit asset list read from a JSON file.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, instrument};

use super::{Catalog, CatalogAsset, CatalogError, dedup_assets};

/// [`Catalog`] reading a JSON array from disk.
///
/// Entries are either bare URL strings or objects:
///
/// ```json
/// [
///   "https://example.com/a.tif",
///   {"href": "https://example.com/b.tif", "datetime": "2022-06-01T00:00:00Z"},
///   {"id": "tile-c", "href": "https://example.com/c.tif"}
/// ]
/// ```
#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestEntry {
    Url(String),
    Asset {
        #[serde(default)]
        id: Option<String>,
        href: String,
        #[serde(default)]
        datetime: Option<DateTime<Utc>>,
    },
}

impl From<ManifestEntry> for CatalogAsset {
    fn from(entry: ManifestEntry) -> Self {
        match entry {
            ManifestEntry::Url(href) => CatalogAsset::from_href(href),
            ManifestEntry::Asset { id, href, datetime } => CatalogAsset {
                id: id.unwrap_or_else(|| href.clone()),
                asset_href: href,
                acquired: datetime,
            },
        }
    }
}

impl ManifestCatalog {
    /// Creates a catalog over the manifest at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Catalog for ManifestCatalog {
    fn name(&self) -> &'static str {
        "manifest"
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn assets(&self) -> Result<Vec<CatalogAsset>, CatalogError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|source| CatalogError::Io {
                path: self.path.clone(),
                source,
            })?;
        let entries: Vec<ManifestEntry> =
            serde_json::from_slice(&raw).map_err(|source| CatalogError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let assets = dedup_assets(entries.into_iter().map(CatalogAsset::from).collect());
        info!(assets = assets.len(), "manifest loaded");
        Ok(assets)
    }
}
