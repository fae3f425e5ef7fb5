//! Integration tests for the progress record.

use std::collections::BTreeSet;
use std::sync::Arc;

use ingest_core::progress::{ProgressError, ProgressStore, lock_path};
use tempfile::TempDir;

#[tokio::test]
async fn test_concurrent_marks_are_all_persisted() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = temp_dir.path().join("download_progress.json");
    let store = Arc::new(ProgressStore::open(&path).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.mark_complete(&format!("item-{i:02}")).await.unwrap()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap(), "each id is new exactly once");
    }

    let on_disk = ProgressStore::load(&path).await;
    assert_eq!(on_disk.len(), 32);
    assert_eq!(on_disk, store.snapshot().await.into_iter().collect::<BTreeSet<_>>());
}

#[tokio::test]
async fn test_record_survives_restart() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = temp_dir.path().join("state/progress.json");

    {
        let store = ProgressStore::open(&path).await.unwrap();
        store.mark_complete("https://assets/a.tif").await.unwrap();
        store.mark_complete("https://assets/b.tif").await.unwrap();
    }

    let store = ProgressStore::open(&path).await.unwrap();
    assert!(store.is_complete("https://assets/a.tif").await);
    assert!(store.is_complete("https://assets/b.tif").await);
    assert!(!store.is_complete("https://assets/c.tif").await);
    assert!(!store.mark_complete("https://assets/a.tif").await.unwrap());
}

#[tokio::test]
async fn test_interrupted_write_leaves_prior_record() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = temp_dir.path().join("download_progress.json");
    std::fs::write(&path, br#"["a", "b"]"#).unwrap();
    // A crash between writing the temporary file and the rename.
    let temp = temp_dir.path().join("download_progress.json.tmp");
    std::fs::write(&temp, br#"["a", "b", "#).unwrap();

    let store = ProgressStore::open(&path).await.unwrap();

    assert_eq!(store.len().await, 2);
    assert!(!temp.exists(), "leftover temporary record should be removed");
}

#[tokio::test]
async fn test_corrupt_record_starts_fresh_and_is_rewritten() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = temp_dir.path().join("download_progress.json");
    std::fs::write(&path, b"\x00\x01 not json").unwrap();

    let store = ProgressStore::open(&path).await.unwrap();
    assert!(store.is_empty().await);
    store.mark_complete("c").await.unwrap();

    let raw = std::fs::read(&path).unwrap();
    let ids: Vec<String> = serde_json::from_slice(&raw).unwrap();
    assert_eq!(ids, ["c"]);
}

#[tokio::test]
async fn test_second_writer_is_rejected_until_first_closes() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = temp_dir.path().join("download_progress.json");

    let first = ProgressStore::open(&path).await.unwrap();
    let second = ProgressStore::open(&path).await;
    assert!(matches!(second, Err(ProgressError::Locked { .. })));
    assert!(lock_path(&path).exists());

    drop(first);
    assert!(ProgressStore::open(&path).await.is_ok());
}

#[tokio::test]
async fn test_inspect_reads_while_locked() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = temp_dir.path().join("download_progress.json");
    let writer = ProgressStore::open(&path).await.unwrap();
    writer.mark_complete("a").await.unwrap();

    let reader = ProgressStore::inspect(&path).await;
    assert!(reader.is_complete("a").await);
    assert!(matches!(
        reader.mark_complete("b").await,
        Err(ProgressError::ReadOnly { .. })
    ));
}
