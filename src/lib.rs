//! Basemap Ingest Core Library
//!
//! Resumable batch ingestion: enumerate imagery assets from a catalog, sign
//! and download each one with bounded concurrency, run it through a chain of
//! external transform programs, and record completion durably so an
//! interrupted batch picks up where it stopped.
//!
//! # Architecture
//!
//! - [`catalog`] - work-list sources (STAC search, local manifest)
//! - [`signer`] - URL authorization before download
//! - [`download`] - streaming downloader and the concurrency gate
//! - [`stage`] - external program stages and their argument templates
//! - [`progress`] - the durable completion record
//! - [`pipeline`] - the orchestrator tying the above together
//! - [`config`] - pipeline description loaded from JSON
//! - [`retry`] - shared retry policy and loop

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod download;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod signer;
pub mod stage;
pub mod staging;
mod user_agent;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogAsset, CatalogError};
pub use config::{ConfigError, PipelineConfig};
pub use download::{ConcurrencyGate, DownloadError, Fetcher, HttpDownloader};
pub use pipeline::{
    Collaborators, ItemFailure, ItemOutcome, ItemState, Orchestrator, PipelineError, RunPaths,
    RunSummary,
};
pub use progress::{ProgressError, ProgressStore};
pub use retry::{FailureType, RetryPolicy, retry_with_backoff};
pub use stage::{CommandStageRunner, StageContext, StageResult, StageRunner, StageSpec};
