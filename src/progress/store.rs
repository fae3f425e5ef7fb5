use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::error::ProgressError;
use crate::staging::remove_if_exists;

/// Durable set of item identifiers that finished the whole pipeline.
///
/// The store is the only writer of its record file. Every
/// [`mark_complete`](Self::mark_complete) writes the full set to a sibling
/// temporary file, syncs it, and renames it over the record, so readers only
/// ever observe the previous record or the new one. The in-memory set is
/// updated only after that swap succeeded.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    completed: Mutex<BTreeSet<String>>,
    lock: Option<File>,
}

impl ProgressStore {
    /// Opens the record at `path` for a run, taking an exclusive lock on
    /// `<path>.lock` that is held until the store is dropped.
    ///
    /// A missing or malformed record yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Locked`] if another run holds the lock, or
    /// [`ProgressError::Io`] if the parent directory or lock file cannot be
    /// created.
    #[instrument(fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ProgressError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProgressError::io(parent, e))?;
        }

        let lock = acquire_lock(&lock_path(&path))?;

        let temp = temp_path(&path);
        if remove_if_exists(&temp).await.unwrap_or(false) {
            debug!(path = %temp.display(), "removed leftover temporary record");
        }

        let completed = Self::load(&path).await;
        info!(completed = completed.len(), "progress record loaded");

        Ok(Self {
            path,
            completed: Mutex::new(completed),
            lock: Some(lock),
        })
    }

    /// Opens the record without locking it. Mutation fails with
    /// [`ProgressError::ReadOnly`].
    pub async fn inspect(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let completed = Self::load(&path).await;
        Self {
            path,
            completed: Mutex::new(completed),
            lock: None,
        }
    }

    /// Reads the persisted set.
    ///
    /// Never fails: a missing file is an empty record, and an unreadable or
    /// malformed one is logged and treated as empty. Losing resume
    /// information only costs repeated work.
    pub async fn load(path: &Path) -> BTreeSet<String> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no progress record yet");
                return BTreeSet::new();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "progress record unreadable; starting fresh");
                return BTreeSet::new();
            }
        };

        match serde_json::from_slice::<Vec<String>>(&raw) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "progress record malformed; starting fresh");
                BTreeSet::new()
            }
        }
    }

    /// Record file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true when `id` is recorded as complete.
    pub async fn is_complete(&self, id: &str) -> bool {
        self.completed.lock().await.contains(id)
    }

    /// Number of recorded items.
    pub async fn len(&self) -> usize {
        self.completed.lock().await.len()
    }

    /// Returns true when nothing has completed yet.
    pub async fn is_empty(&self) -> bool {
        self.completed.lock().await.is_empty()
    }

    /// Sorted copy of the recorded identifiers.
    pub async fn snapshot(&self) -> Vec<String> {
        self.completed.lock().await.iter().cloned().collect()
    }

    /// Adds `id` and durably persists the whole set before returning.
    ///
    /// Returns `false` if `id` was already recorded (nothing is written).
    ///
    /// # Errors
    ///
    /// On any persistence failure the in-memory set is left unchanged, so the
    /// item is not considered complete and will be retried by the next run.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn mark_complete(&self, id: &str) -> Result<bool, ProgressError> {
        if self.lock.is_none() {
            return Err(ProgressError::ReadOnly {
                path: self.path.clone(),
            });
        }

        // Held across the write: mutations are applied one at a time.
        let mut completed = self.completed.lock().await;
        if completed.contains(id) {
            return Ok(false);
        }

        let mut next = completed.clone();
        next.insert(id.to_string());
        self.persist(&next).await?;
        *completed = next;

        debug!(item = id, total = completed.len(), "item recorded complete");
        Ok(true)
    }

    async fn persist(&self, set: &BTreeSet<String>) -> Result<(), ProgressError> {
        let encoded = serde_json::to_vec_pretty(set)?;
        let temp = temp_path(&self.path);

        let write = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(&encoded).await?;
            file.sync_all().await?;
            Ok::<(), std::io::Error>(())
        };

        if let Err(e) = write.await {
            let _ = remove_if_exists(&temp).await;
            return Err(ProgressError::io(&temp, e));
        }

        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = remove_if_exists(&temp).await;
            return Err(ProgressError::io(&self.path, e));
        }

        Ok(())
    }
}

impl Drop for ProgressStore {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take()
            && let Err(e) = FileExt::unlock(&lock)
        {
            warn!(path = %self.path.display(), error = %e, "failed to release progress lock");
        }
    }
}

fn acquire_lock(path: &Path) -> Result<File, ProgressError> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| ProgressError::io(path, e))?;

    file.try_lock_exclusive().map_err(|e| {
        if e.kind() == std::io::ErrorKind::WouldBlock
            || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
        {
            ProgressError::Locked {
                path: path.to_path_buf(),
            }
        } else {
            ProgressError::io(path, e)
        }
    })?;

    Ok(file)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Lock file guarding `record`.
#[must_use]
pub fn lock_path(record: &Path) -> PathBuf {
    sibling(record, ".lock")
}

fn temp_path(record: &Path) -> PathBuf {
    sibling(record, ".tmp")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_missing_record_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = ProgressStore::open(temp.path().join("download_progress.json"))
            .await
            .unwrap();
        assert!(store.is_empty().await);
        assert!(!store.is_complete("https://example.com/a.tif").await);
    }

    #[tokio::test]
    async fn test_open_malformed_record_starts_fresh() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("download_progress.json");
        std::fs::write(&path, b"[\"https://example.com/a.tif\", ").unwrap();

        let store = ProgressStore::open(&path).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_mark_complete_persists_json_array() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("download_progress.json");
        let store = ProgressStore::open(&path).await.unwrap();

        assert!(store.mark_complete("b").await.unwrap());
        assert!(store.mark_complete("a").await.unwrap());
        assert!(!store.mark_complete("a").await.unwrap());

        let on_disk: Vec<String> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec!["a".to_string(), "b".to_string()]);
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_reopen_sees_previous_completions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("download_progress.json");
        {
            let store = ProgressStore::open(&path).await.unwrap();
            store.mark_complete("https://example.com/a.tif").await.unwrap();
        }
        let store = ProgressStore::open(&path).await.unwrap();
        assert!(store.is_complete("https://example.com/a.tif").await);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_second_open_is_locked_out() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("download_progress.json");
        let _first = ProgressStore::open(&path).await.unwrap();

        let second = ProgressStore::open(&path).await;
        assert!(matches!(second, Err(ProgressError::Locked { .. })));
    }

    #[tokio::test]
    async fn test_inspect_is_read_only() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("download_progress.json");
        std::fs::write(&path, br#"["a"]"#).unwrap();

        let store = ProgressStore::inspect(&path).await;
        assert!(store.is_complete("a").await);
        assert!(matches!(
            store.mark_complete("b").await,
            Err(ProgressError::ReadOnly { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_persist_leaves_item_incomplete() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("state");
        let path = dir.join("download_progress.json");
        let store = ProgressStore::open(&path).await.unwrap();
        store.mark_complete("a").await.unwrap();

        std::fs::remove_dir_all(&dir).unwrap();

        let result = store.mark_complete("b").await;
        assert!(matches!(result, Err(ProgressError::Io { .. })));
        assert!(!store.is_complete("b").await);
        assert!(store.is_complete("a").await);
    }

    #[test]
    fn test_lock_path_is_sibling() {
        assert_eq!(
            lock_path(Path::new("/out/download_progress.json")),
            PathBuf::from("/out/download_progress.json.lock")
        );
    }
}
