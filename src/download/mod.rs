//! Asset transfer: admission control plus a streaming, retrying HTTP fetcher.
//!
//! # Features
//!
//! - Streaming downloads (memory-efficient for multi-gigabyte rasters)
//! - Stall detection: no forward progress within the window aborts the attempt
//! - Linear backoff between attempts (`attempt × step`)
//! - Partial files never survive a failed attempt
//! - Bounded number of simultaneous transfers via [`ConcurrencyGate`]
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use ingest_core::download::{DownloadOptions, Fetcher, HttpDownloader};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = HttpDownloader::new(DownloadOptions::default())?;
//! let fetched = downloader
//!     .fetch(
//!         "https://example.com/tile.tif",
//!         Path::new("./staging/input_0.tif"),
//!         &CancellationToken::new(),
//!     )
//!     .await
//!     .map_err(|failure| failure.error)?;
//! println!("{} bytes after {} attempt(s)", fetched.bytes, fetched.attempts);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod gate;

pub use client::{DownloadOptions, FetchFailure, Fetched, Fetcher, HttpDownloader, partial_path};
pub use error::DownloadError;
pub use gate::{ConcurrencyGate, DEFAULT_CAPACITY, GateError, GatePermit, MAX_CAPACITY, MIN_CAPACITY};
