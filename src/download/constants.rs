//! Constants for the download module (timeouts, chunking).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default stall window: a transfer with no new bytes for this long is aborted.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Size of the write buffer between the response stream and the staging file (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Suffix of the file a transfer writes into before it is verified.
pub const PARTIAL_SUFFIX: &str = "part";
