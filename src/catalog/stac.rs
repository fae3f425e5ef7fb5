//! STAC item search.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use super::{Catalog, CatalogAsset, CatalogError, dedup_assets};
use crate::user_agent::default_user_agent;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Planetary Computer STAC search endpoint.
pub const PLANETARY_COMPUTER_STAC_SEARCH: &str =
    "https://planetarycomputer.microsoft.com/api/stac/v1/search";

/// Search request settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacSearch {
    /// Search endpoint (POST).
    pub url: String,
    /// Request body sent verbatim.
    pub body: Value,
    /// Key under each feature's `assets` holding the raster href.
    #[serde(default = "default_asset_key")]
    pub asset_key: String,
    /// Keep only features acquired in the most recent year present.
    #[serde(default)]
    pub latest_year_only: bool,
}

fn default_asset_key() -> String {
    "image".to_string()
}

impl Default for StacSearch {
    /// Recent sub-meter NAIP imagery over a small area of central Kentucky.
    fn default() -> Self {
        Self {
            url: PLANETARY_COMPUTER_STAC_SEARCH.to_string(),
            body: json!({
                "collections": ["naip"],
                "intersects": {
                    "type": "Polygon",
                    "coordinates": [[
                        [-85.769_752_302_231_91, 37.638_319_751_753_71],
                        [-85.797_922_997_325_26, 37.556_622_960_281_146],
                        [-85.779_178_083_480_03, 37.558_211_386_666_116],
                        [-85.773_134_290_609_8, 37.583_697_845_837_59],
                        [-85.760_394_717_477_62, 37.611_285_492_038_65],
                        [-85.748_331_512_472_18, 37.631_427_606_387_45],
                        [-85.517_776_473_696_74, 37.629_885_160_597_04],
                        [-85.517_091_269_579_44, 37.642_630_835_762_42],
                        [-85.643_888_827_019_48, 37.643_111_401_941_64],
                        [-85.769_752_302_231_91, 37.638_319_751_753_71]
                    ]]
                },
                "limit": 2,
                "query": {
                    "datetime": {"gte": "2020-01-01"},
                    "gsd": {"lte": 0.6}
                },
                "sortby": [{"field": "datetime", "direction": "desc"}]
            }),
            asset_key: default_asset_key(),
            latest_year_only: true,
        }
    }
}

/// [`Catalog`] backed by a STAC `/search` endpoint.
#[derive(Debug, Clone)]
pub struct StacCatalog {
    client: Client,
    search: StacSearch,
}

impl StacCatalog {
    /// Creates a catalog for the given search.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Client`] when the HTTP client cannot be built.
    pub fn new(search: StacSearch) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .user_agent(default_user_agent())
            .gzip(true)
            .build()
            .map_err(CatalogError::Client)?;
        Ok(Self { client, search })
    }
}

#[async_trait]
impl Catalog for StacCatalog {
    fn name(&self) -> &'static str {
        "stac"
    }

    #[instrument(skip(self), fields(url = %self.search.url))]
    async fn assets(&self) -> Result<Vec<CatalogAsset>, CatalogError> {
        let url = &self.search.url;
        let response = self
            .client
            .post(url)
            .json(&self.search.body)
            .send()
            .await
            .map_err(|source| CatalogError::Network {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::HttpStatus {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CatalogError::malformed(format!("response is not JSON: {e}")))?;

        let assets = parse_features(&body, &self.search.asset_key, self.search.latest_year_only)?;
        info!(assets = assets.len(), "catalog search complete");
        Ok(assets)
    }
}

/// Extracts assets from a STAC `FeatureCollection`.
///
/// Features without the requested asset are skipped. With `latest_year_only`
/// the result is ordered newest first and restricted to the newest year.
///
/// # Errors
///
/// Returns [`CatalogError::Malformed`] when the body has no `features` array.
pub fn parse_features(
    body: &Value,
    asset_key: &str,
    latest_year_only: bool,
) -> Result<Vec<CatalogAsset>, CatalogError> {
    let features = body
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| CatalogError::malformed("missing `features` array"))?;
    debug!(features = features.len(), "parsing catalog features");

    let mut assets: Vec<CatalogAsset> = features
        .iter()
        .filter_map(|feature| {
            let href = feature
                .get("assets")
                .and_then(|assets| assets.get(asset_key))
                .and_then(|asset| asset.get("href"))
                .and_then(Value::as_str);
            let Some(href) = href else {
                let feature_id = feature.get("id").and_then(Value::as_str).unwrap_or("?");
                debug!(feature = feature_id, asset_key, "feature has no matching asset; skipping");
                return None;
            };
            let acquired = feature
                .get("properties")
                .and_then(|props| props.get("datetime"))
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|at| at.with_timezone(&Utc));

            Some(CatalogAsset {
                id: href.to_string(),
                asset_href: href.to_string(),
                acquired,
            })
        })
        .collect();

    if latest_year_only {
        assets.sort_by(|a, b| b.acquired.cmp(&a.acquired));
        if let Some(latest) = assets.iter().filter_map(CatalogAsset::year).max() {
            assets.retain(|asset| asset.year() == Some(latest));
            debug!(year = latest, kept = assets.len(), "restricted to latest acquisition year");
        }
    }

    Ok(dedup_assets(assets))
}
