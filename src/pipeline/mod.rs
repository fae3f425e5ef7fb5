//! Batch orchestration.
//!
//! The [`Orchestrator`] enumerates the work list from a catalog, skips items
//! already recorded in the progress store, and moves each remaining item
//! through the lifecycle in [`ItemState`]. It never stops the batch for an item
//! failure: failed items are left out of the progress record and picked up by
//! the next run.
//!
//! # Example
//!
//! ```no_run
//! use ingest_core::config::PipelineConfig;
//! use ingest_core::pipeline::{Collaborators, Orchestrator, RunPaths};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load(None)?;
//! let collaborators = Collaborators::from_config(&config)?;
//! let orchestrator = Orchestrator::new(
//!     config,
//!     RunPaths::new("/data/tiles"),
//!     collaborators,
//!     CancellationToken::new(),
//! )?;
//!
//! let summary = orchestrator.run().await?;
//! println!("{} completed, {} failed", summary.completed, summary.failed);
//! # Ok(())
//! # }
//! ```

mod error;
mod item;
mod orchestrator;
mod stats;

pub use error::PipelineError;
pub use item::{Item, ItemDirs, ItemFailure, ItemOutcome, ItemReport, ItemState, item_key};
pub use orchestrator::{
    Collaborators, DEFAULT_STAGING_DIR, Orchestrator, PlannedItem, RunPaths, RunPlan,
};
pub use stats::{RunStats, RunSummary};
