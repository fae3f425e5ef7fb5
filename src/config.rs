//! Pipeline configuration: where items come from, how they are fetched, and
//! which stages turn them into final artifacts.
//!
//! Loaded from a JSON file; every field has a default, so `{}` is the built-in
//! NAIP pipeline (color fix, reprojection to web mercator, MBTiles, overviews,
//! metadata patch).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::catalog::StacSearch;
use crate::download::constants::{CHUNK_SIZE, CONNECT_TIMEOUT_SECS, STALL_TIMEOUT};
use crate::download::{DEFAULT_CAPACITY, DownloadOptions, MAX_CAPACITY, MIN_CAPACITY};
use crate::retry::{
    DEFAULT_LINEAR_STEP, DEFAULT_MAX_ATTEMPTS, DEFAULT_SIGN_ATTEMPTS, DEFAULT_SIGN_DELAY,
    RetryPolicy,
};
use crate::signer::PLANETARY_COMPUTER_SIGN_ENDPOINT;
use crate::stage::{StageError, StageSpec, check_template, template};

/// Default delay between re-runs of a stage that declares `retries`.
pub const DEFAULT_STAGE_RETRY_DELAY_SECS: u64 = 5;

/// Upper bound on download attempts.
pub const MAX_ATTEMPTS: u32 = 10;

/// Errors loading or validating a pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON of the expected shape.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is out of range or inconsistent.
    #[error("Invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A stage declaration is unusable.
    #[error("invalid stage declaration: {0}")]
    Stage(#[from] StageError),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Where the work list comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogConfig {
    /// STAC item search.
    Stac(StacSearch),
    /// Local JSON manifest.
    Manifest {
        /// Manifest path.
        path: PathBuf,
    },
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::Stac(StacSearch::default())
    }
}

/// How raw asset URLs are authorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignerConfig {
    /// URLs are fetched as-is.
    None,
    /// SAS token endpoint.
    SasToken {
        /// Signing endpoint.
        endpoint: String,
    },
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self::SasToken {
            endpoint: PLANETARY_COMPUTER_SIGN_ENDPOINT.to_string(),
        }
    }
}

/// Transfer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadConfig {
    /// Maximum simultaneous downloads.
    pub concurrency: usize,
    /// Attempts per asset, including the first.
    pub max_attempts: u32,
    /// Linear backoff step in seconds.
    pub retry_step_secs: u64,
    /// Seconds without forward progress before a transfer is abandoned.
    pub stall_timeout_secs: u64,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Write buffer size in bytes.
    pub chunk_size: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CAPACITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_step_secs: DEFAULT_LINEAR_STEP.as_secs(),
            stall_timeout_secs: STALL_TIMEOUT.as_secs(),
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            chunk_size: CHUNK_SIZE,
        }
    }
}

impl DownloadConfig {
    /// Converts to downloader options.
    #[must_use]
    pub fn options(&self) -> DownloadOptions {
        DownloadOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            chunk_size: self.chunk_size,
            retry: RetryPolicy::linear(self.max_attempts, Duration::from_secs(self.retry_step_secs)),
        }
    }
}

/// Signing retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SigningConfig {
    /// Attempts per URL, including the first.
    pub attempts: u32,
    /// Fixed delay between attempts, in seconds.
    pub delay_secs: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_SIGN_ATTEMPTS,
            delay_secs: DEFAULT_SIGN_DELAY.as_secs(),
        }
    }
}

impl SigningConfig {
    /// Retry policy for the signing step.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.attempts, Duration::from_secs(self.delay_secs))
    }
}

/// What happens to later best-effort stages once one best-effort stage failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BestEffortPolicy {
    /// Every best-effort stage is attempted.
    #[default]
    Independent,
    /// Later best-effort stages of the same item are skipped.
    SkipAfterFailure,
}

/// Complete pipeline description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Work-list source.
    pub catalog: CatalogConfig,
    /// URL authorization.
    pub signer: SignerConfig,
    /// Transfer settings.
    pub download: DownloadConfig,
    /// Signing retry settings.
    pub signing: SigningConfig,
    /// Number of items processed at once. Defaults to the download concurrency.
    pub workers: Option<usize>,
    /// Maximum items in their transform chain at once.
    pub transform_concurrency: usize,
    /// Delay between re-runs of a failed stage, in seconds.
    pub stage_retry_delay_secs: u64,
    /// Path template for the downloaded asset.
    pub source_path: String,
    /// Path template for the item's final artifact.
    pub final_output: String,
    /// Handling of best-effort stages after a best-effort failure.
    pub best_effort_policy: BestEffortPolicy,
    /// Ordered transform chain.
    pub stages: Vec<StageSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            signer: SignerConfig::default(),
            download: DownloadConfig::default(),
            signing: SigningConfig::default(),
            workers: None,
            transform_concurrency: 1,
            stage_retry_delay_secs: DEFAULT_STAGE_RETRY_DELAY_SECS,
            source_path: "{staging_dir}/input_{key}.tif".to_string(),
            final_output: "{output_dir}/naip_tile_{key}.mbtiles".to_string(),
            best_effort_policy: BestEffortPolicy::default(),
            stages: default_stages(),
        }
    }
}

/// The NAIP basemap chain.
#[must_use]
pub fn default_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new("color-fix", "gdal_translate")
            .args([
                "-of", "GTiff", "-co", "COMPRESS=LZW", "-co", "PHOTOMETRIC=RGB", "-b", "1", "-b",
                "2", "-b", "3", "{input}", "{output}",
            ])
            .output("{staging_dir}/corrected_{key}.tif"),
        StageSpec::new("reproject", "gdalwarp")
            .args([
                "-r",
                "lanczos",
                "-of",
                "GTiff",
                "-co",
                "COMPRESS=LZW",
                "-co",
                "TILED=YES",
                "-co",
                "BLOCKXSIZE=256",
                "-co",
                "BLOCKYSIZE=256",
                "-co",
                "PREDICTOR=2",
                "-co",
                "BIGTIFF=YES",
                "-co",
                "PHOTOMETRIC=RGB",
                "-t_srs",
                "EPSG:3857",
                "-tr",
                "1.0",
                "1.0",
                "-tap",
                "-multi",
                "-wo",
                "NUM_THREADS=ALL_CPUS",
                "-dstnodata",
                "0",
                "{input}",
                "{output}",
            ])
            .output("{staging_dir}/resampled_{key}.tif"),
        StageSpec::new("mbtiles", "gdal_translate")
            .args([
                "-of",
                "MBTILES",
                "-co",
                "TILE_FORMAT=JPEG",
                "-co",
                "QUALITY=100",
                "-co",
                "RESAMPLING=CUBIC",
                "-co",
                "MINZOOM=1",
                "-co",
                "MAXZOOM=16",
                "-mo",
                "minzoom=1",
                "-mo",
                "maxzoom=16",
                "--config",
                "GDAL_CACHEMAX",
                "1024",
                "{input}",
                "{output}",
            ])
            .output("{final}"),
        StageSpec::new("overviews", "gdaladdo")
            .args([
                "-r",
                "lanczos",
                "--config",
                "COMPRESS_OVERVIEW",
                "LZW",
                "--config",
                "GDAL_NUM_THREADS",
                "ALL_CPUS",
                "{final}",
                "2",
                "4",
                "8",
                "16",
                "32",
                "64",
                "128",
                "256",
                "512",
                "1024",
                "2048",
                "4096",
                "8192",
            ])
            .best_effort(),
        StageSpec::new("verify", "gdalinfo").args(["{final}"]).best_effort(),
        StageSpec::new("zoom-metadata", "sqlite3")
            .args([
                "{final}",
                "UPDATE metadata SET value='1' WHERE name='minzoom'; UPDATE metadata SET value='16' WHERE name='maxzoom';",
            ])
            .best_effort(),
    ]
}

impl PipelineConfig {
    /// Loads the pipeline from `path`, or the built-in one when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed, or validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            None => {
                debug!("using built-in pipeline");
                Self::default()
            }
            Some(path) => {
                let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                let config: Self =
                    serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
                        path: path.to_path_buf(),
                        source,
                    })?;
                debug!(path = %path.display(), stages = config.stages.len(), "pipeline loaded");
                config
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Number of items processed at once.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or(self.download.concurrency)
    }

    /// Policy for re-running stage `stage`.
    #[must_use]
    pub fn stage_retry_policy(&self, stage: &StageSpec) -> RetryPolicy {
        RetryPolicy::fixed(
            stage.retries.saturating_add(1),
            Duration::from_secs(self.stage_retry_delay_secs),
        )
    }

    /// Validates values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let concurrency = self.download.concurrency;
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&concurrency) {
            return Err(ConfigError::invalid(
                "download.concurrency",
                format!("{concurrency}. Expected range: {MIN_CAPACITY}..={MAX_CAPACITY}"),
            ));
        }
        if let Some(workers) = self.workers
            && !(MIN_CAPACITY..=MAX_CAPACITY).contains(&workers)
        {
            return Err(ConfigError::invalid(
                "workers",
                format!("{workers}. Expected range: {MIN_CAPACITY}..={MAX_CAPACITY}"),
            ));
        }
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&self.transform_concurrency) {
            return Err(ConfigError::invalid(
                "transform_concurrency",
                format!(
                    "{}. Expected range: {MIN_CAPACITY}..={MAX_CAPACITY}",
                    self.transform_concurrency
                ),
            ));
        }
        let attempts = self.download.max_attempts;
        if !(1..=MAX_ATTEMPTS).contains(&attempts) {
            return Err(ConfigError::invalid(
                "download.max_attempts",
                format!("{attempts}. Expected range: 1..={MAX_ATTEMPTS}"),
            ));
        }
        if self.signing.attempts == 0 {
            return Err(ConfigError::invalid("signing.attempts", "0. Expected at least 1"));
        }
        if self.download.stall_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "download.stall_timeout_secs",
                "0. Expected at least 1",
            ));
        }
        if self.download.chunk_size == 0 {
            return Err(ConfigError::invalid("download.chunk_size", "0. Expected at least 1"));
        }

        validate_path_template("source_path", &self.source_path)?;
        validate_path_template("final_output", &self.final_output)?;

        if self.stages.is_empty() {
            return Err(ConfigError::invalid("stages", "pipeline declares no stages"));
        }

        let mut names = HashSet::new();
        for stage in &self.stages {
            stage.validate()?;
            if !names.insert(stage.name.as_str()) {
                return Err(ConfigError::invalid(
                    "stages",
                    format!("duplicate stage name `{}`", stage.name),
                ));
            }
        }

        if !self
            .stages
            .iter()
            .any(|stage| !stage.best_effort && stage.writes_final())
        {
            return Err(ConfigError::invalid(
                "stages",
                "no mandatory stage writes the final artifact (`\"output\": \"{final}\"`)",
            ));
        }

        Ok(())
    }
}

/// Item path templates may only use values known before the chain starts.
fn validate_path_template(field: &str, value: &str) -> Result<(), ConfigError> {
    check_template(value)?;
    if let Some(name) = template::placeholders_in(value)
        .into_iter()
        .find(|name| matches!(*name, "input" | "output" | "source" | "final"))
    {
        return Err(ConfigError::invalid(
            field,
            format!("`{value}` cannot reference {{{name}}}"),
        ));
    }
    Ok(())
}
