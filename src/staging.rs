//! Per-item staging artifacts and their removal.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Removes a file, treating "already gone" as success.
///
/// Returns `true` when a file was actually deleted.
///
/// # Errors
///
/// Propagates any IO error other than `NotFound`.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Files one item has produced so far, split into throwaway intermediates and
/// the single final artifact.
///
/// Each item owns its workspace; paths are derived from the item's key so
/// concurrent items never share a file. The final artifact is only removed on
/// failure once it has been claimed, i.e. a stage writing it has started.
#[derive(Debug)]
pub struct ItemWorkspace {
    final_artifact: PathBuf,
    final_claimed: bool,
    intermediates: Vec<PathBuf>,
}

impl ItemWorkspace {
    /// Creates an empty workspace for an item whose deliverable is `final_artifact`.
    #[must_use]
    pub fn new(final_artifact: PathBuf) -> Self {
        Self {
            final_artifact,
            final_claimed: false,
            intermediates: Vec::new(),
        }
    }

    /// Marks the final artifact as being written by this item.
    pub fn claim_final(&mut self) {
        self.final_claimed = true;
    }

    /// Whether a stage writing the final artifact has started.
    #[must_use]
    pub fn final_claimed(&self) -> bool {
        self.final_claimed
    }

    /// The item's deliverable.
    #[must_use]
    pub fn final_artifact(&self) -> &Path {
        &self.final_artifact
    }

    /// Records a path that must not outlive the item. The final artifact is never tracked.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if path != self.final_artifact && !self.intermediates.contains(&path) {
            self.intermediates.push(path);
        }
    }

    /// Paths currently tracked as intermediates.
    #[must_use]
    pub fn intermediates(&self) -> &[PathBuf] {
        &self.intermediates
    }

    /// Removes every intermediate, leaving the final artifact in place.
    ///
    /// Removal failures are logged and otherwise ignored; returns how many
    /// files were deleted.
    pub async fn clean_intermediates(&mut self) -> usize {
        let mut removed = 0;
        for path in self.intermediates.drain(..) {
            match remove_if_exists(&path).await {
                Ok(true) => {
                    debug!(path = %path.display(), "removed staging artifact");
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove staging artifact"),
            }
        }
        removed
    }

    /// Removes intermediates and, if this item claimed it, whatever part of
    /// the final artifact a failed attempt left behind.
    pub async fn discard_all(&mut self) -> usize {
        let mut removed = self.clean_intermediates().await;
        if !self.final_claimed {
            return removed;
        }
        match remove_if_exists(&self.final_artifact).await {
            Ok(true) => {
                debug!(path = %self.final_artifact.display(), "removed incomplete final artifact");
                removed += 1;
            }
            Ok(false) => {}
            Err(e) => warn!(
                path = %self.final_artifact.display(),
                error = %e,
                "failed to remove incomplete final artifact"
            ),
        }
        removed
    }
}
