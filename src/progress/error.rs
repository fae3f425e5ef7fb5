//! Error types for progress record operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`super::ProgressStore`].
#[derive(Debug, Error)]
pub enum ProgressError {
    /// Reading, writing, or swapping the record file failed.
    #[error("progress record IO error at {path}: {source}")]
    Io {
        /// File involved in the failed operation.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The completed set could not be encoded.
    #[error("failed to encode progress record: {0}")]
    Encode(#[from] serde_json::Error),

    /// Another run already holds the record's lock file.
    #[error("progress record {path} is locked by another run")]
    Locked {
        /// The lock file that could not be acquired.
        path: PathBuf,
    },

    /// The store was opened for inspection only.
    #[error("progress record {path} was opened read-only")]
    ReadOnly {
        /// The record file.
        path: PathBuf,
    },
}

impl ProgressError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
