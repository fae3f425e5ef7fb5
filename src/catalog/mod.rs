//! Work-list sources.
//!
//! A [`Catalog`] yields the assets a run should process. The pipeline only
//! consumes the list and removes duplicates; search logic stays inside each
//! implementation:
//!
//! - [`StacCatalog`] - STAC item search over HTTP
//! - [`ManifestCatalog`] - a JSON file listing assets explicitly

mod error;
mod manifest;
mod stac;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

pub use error::CatalogError;
pub use manifest::ManifestCatalog;
pub use stac::{StacCatalog, StacSearch};

/// One asset offered by a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogAsset {
    /// Stable identifier; the source URL unless the catalog says otherwise.
    pub id: String,
    /// Raw (unsigned) download location.
    pub asset_href: String,
    /// Acquisition timestamp, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquired: Option<DateTime<Utc>>,
}

impl CatalogAsset {
    /// Creates an asset identified by its own href.
    pub fn from_href(href: impl Into<String>) -> Self {
        let href = href.into();
        Self {
            id: href.clone(),
            asset_href: href,
            acquired: None,
        }
    }

    /// Sets the acquisition timestamp.
    #[must_use]
    pub fn acquired_at(mut self, acquired: DateTime<Utc>) -> Self {
        self.acquired = Some(acquired);
        self
    }

    /// Acquisition year, when known.
    #[must_use]
    pub fn year(&self) -> Option<i32> {
        self.acquired.map(|at| at.year())
    }
}

/// Source of the run's work list.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Enumerates assets to process, in catalog order.
    async fn assets(&self) -> Result<Vec<CatalogAsset>, CatalogError>;
}

/// Drops repeated identifiers, keeping the first occurrence and catalog order.
#[must_use]
pub fn dedup_assets(assets: Vec<CatalogAsset>) -> Vec<CatalogAsset> {
    let mut seen = HashSet::with_capacity(assets.len());
    assets
        .into_iter()
        .filter(|asset| seen.insert(asset.id.clone()))
        .collect()
}
