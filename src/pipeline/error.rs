//! Run-level errors.
//!
//! Item failures are never reported through this type; they become
//! [`super::ItemOutcome::Failed`] entries in the run summary.

use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::download::GateError;
use crate::progress::ProgressError;

/// Conditions that prevent a run from doing any work.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The catalog returned nothing to process.
    #[error("catalog returned no items")]
    NoItems,

    /// The work list could not be obtained.
    #[error("catalog failed: {0}")]
    Catalog(#[from] CatalogError),

    /// The progress record could not be opened.
    #[error("progress store unavailable: {0}")]
    Progress(#[from] ProgressError),

    /// Staging or output directories could not be prepared.
    #[error("failed to prepare {path}: {source}")]
    Workspace {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An item path template could not be rendered.
    #[error("failed to render item path `{template}`: {reason}")]
    ItemPath {
        /// The offending template.
        template: String,
        /// Why rendering failed.
        reason: String,
    },

    /// A concurrency gate rejected its configuration.
    #[error("invalid concurrency: {0}")]
    Gate(#[from] GateError),

    /// A collaborator could not be constructed.
    #[error("failed to set up {component}: {reason}")]
    Setup {
        /// Which collaborator.
        component: &'static str,
        /// Why construction failed.
        reason: String,
    },
}
