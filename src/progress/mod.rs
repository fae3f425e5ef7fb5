//! Crash-safe record of which items have finished the pipeline.
//!
//! The record is a JSON array of item identifiers (source URLs), rewritten in
//! full on every completion via write-temp-then-rename.
//!
//! ```no_run
//! use ingest_core::progress::ProgressStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ProgressStore::open("./output/download_progress.json").await?;
//! if !store.is_complete("https://example.com/a.tif").await {
//!     // ... process the item ...
//!     store.mark_complete("https://example.com/a.tif").await?;
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod store;

pub use error::ProgressError;
pub use store::{ProgressStore, lock_path};

/// File name of the record inside the output directory.
pub const DEFAULT_PROGRESS_FILE: &str = "download_progress.json";
