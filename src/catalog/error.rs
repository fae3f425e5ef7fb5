//! Error types for catalog collaborators.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while enumerating assets.
///
/// Any of these ends the run: without a work list there is nothing to do.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The search endpoint could not be reached.
    #[error("network error querying catalog {url}: {source}")]
    Network {
        /// Search endpoint.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The search endpoint answered with a non-success status.
    #[error("catalog {url} returned HTTP {status}")]
    HttpStatus {
        /// Search endpoint.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The search response did not have the expected shape.
    #[error("malformed catalog response: {reason}")]
    Malformed {
        /// What was missing or wrong.
        reason: String,
    },

    /// A manifest file could not be read.
    #[error("failed to read manifest {path}: {source}")]
    Io {
        /// Manifest path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A manifest file is not valid JSON of the expected shape.
    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        /// Manifest path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build catalog client: {0}")]
    Client(#[source] reqwest::Error),
}

impl CatalogError {
    /// Creates a malformed-response error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}
