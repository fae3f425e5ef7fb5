//! Item types, lifecycle states, and per-item outcomes.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::CatalogAsset;
use crate::stage::template::year_label;
use crate::stage::{StageError, StageResult, substitute};

/// Lifecycle state of one item.
///
/// ```text
/// PENDING -> RESOLVING -> DOWNLOADING -> DOWNLOADED -> TRANSFORMING -> COMPLETE
///                |              |                            |
///                v              v                            v
///             FAILED         FAILED                       FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Enumerated, not yet checked against the progress record.
    Pending,
    /// Signing the asset URL.
    Resolving,
    /// Transfer in progress under a download slot.
    Downloading,
    /// Asset present in staging.
    Downloaded,
    /// Running the stage chain.
    Transforming,
    /// Recorded complete (or already was).
    Complete,
    /// Gave up on this item for this run.
    Failed,
}

impl ItemState {
    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Transforming => "transforming",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// True for `Complete` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which step an item failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemFailure {
    /// URL signing exhausted its attempts.
    Resolve,
    /// Download exhausted its attempts.
    Download,
    /// A mandatory stage failed.
    Stage,
    /// The completion could not be persisted.
    Persist,
    /// Shutdown was requested while the item was in flight.
    Interrupted,
}

impl ItemFailure {
    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Download => "download",
            Self::Stage => "stage",
            Self::Persist => "persist",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// 1-based position in the run's work list.
    pub index: usize,
    /// Stable identifier and dedup key.
    pub id: String,
    /// File-name-safe key derived from `id`; see [`item_key`].
    pub key: String,
    /// Raw asset URL from the catalog.
    pub source_href: String,
    /// Signed URL, once resolved.
    pub resolved_url: Option<String>,
    /// Acquisition year, when known.
    pub year: Option<i32>,
    /// Where the downloaded asset is staged.
    pub source_path: PathBuf,
    /// The item's final artifact.
    pub final_artifact: PathBuf,
}

/// Directories an item's paths are derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDirs<'a> {
    /// Directory for intermediates.
    pub staging_dir: &'a Path,
    /// Directory for final artifacts.
    pub output_dir: &'a Path,
}

impl Item {
    /// Builds an item from a catalog asset, rendering its source and final paths.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] when a template references a placeholder that
    /// has no value before the chain starts.
    pub fn from_asset(
        index: usize,
        asset: CatalogAsset,
        source_template: &str,
        final_template: &str,
        dirs: &ItemDirs<'_>,
    ) -> Result<Self, StageError> {
        let year = asset.year();
        let key = item_key(&asset.id, &asset.asset_href);
        let lookup = |name: &str| match name {
            "index" => Some(index.to_string()),
            "key" => Some(key.clone()),
            "year" => Some(year_label(year)),
            "staging_dir" => Some(dirs.staging_dir.display().to_string()),
            "output_dir" => Some(dirs.output_dir.display().to_string()),
            _ => None,
        };

        let source_path = PathBuf::from(substitute(source_template, lookup)?);
        let final_artifact = PathBuf::from(substitute(final_template, lookup)?);

        Ok(Self {
            index,
            source_path,
            final_artifact,
            id: asset.id,
            key,
            source_href: asset.asset_href,
            resolved_url: None,
            year,
        })
    }

    /// URL to download: the signed one when available.
    #[must_use]
    pub fn download_url(&self) -> &str {
        self.resolved_url.as_deref().unwrap_or(&self.source_href)
    }
}

/// Per-item file key: the href's file stem plus a short digest of `id`.
///
/// Unlike the run index, the key does not change when the catalog is
/// reordered, so an item's paths never collide with another item's.
#[must_use]
pub fn item_key(id: &str, href: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    let short: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();

    let name = href
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .unwrap_or_default();
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let stem: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        .take(64)
        .collect();

    if stem.is_empty() {
        short
    } else {
        format!("{stem}_{short}")
    }
}

/// How an item ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Already recorded complete; no work done.
    Skipped,
    /// Processed and recorded complete in this run.
    Completed {
        /// Download attempts, including the successful one.
        download_attempts: u32,
        /// Result of every stage that ran.
        stages: Vec<StageResult>,
    },
    /// Not recorded complete; will be retried by the next run.
    Failed {
        /// Step that failed.
        kind: ItemFailure,
        /// Diagnostic message.
        reason: String,
        /// Download attempts made (0 if the download never started).
        download_attempts: u32,
        /// Result of every stage that ran.
        stages: Vec<StageResult>,
    },
}

impl ItemOutcome {
    /// Terminal state corresponding to this outcome.
    #[must_use]
    pub fn state(&self) -> ItemState {
        match self {
            Self::Skipped | Self::Completed { .. } => ItemState::Complete,
            Self::Failed { .. } => ItemState::Failed,
        }
    }

    /// Download attempts made in this run.
    #[must_use]
    pub fn download_attempts(&self) -> u32 {
        match self {
            Self::Skipped => 0,
            Self::Completed {
                download_attempts, ..
            }
            | Self::Failed {
                download_attempts, ..
            } => *download_attempts,
        }
    }

    /// Failure classification, if the item failed.
    #[must_use]
    pub fn failure(&self) -> Option<ItemFailure> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Final record of one item in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    /// 1-based position in the work list.
    pub index: usize,
    /// Item identifier.
    pub id: String,
    /// How it ended.
    pub outcome: ItemOutcome,
}

impl ItemReport {
    /// Terminal state.
    #[must_use]
    pub fn state(&self) -> ItemState {
        self.outcome.state()
    }
}
