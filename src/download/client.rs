//! Streaming HTTP downloader with stall detection and retry.
//!
//! A transfer writes into `<destination>.part`, tracking the instant of the
//! last chunk that reached disk. When no chunk arrives within the stall window
//! the transfer is aborted with [`DownloadError::Stalled`]. Only a non-empty,
//! fully flushed file is renamed onto the destination; every failure path
//! removes both the partial and destination files so the next attempt starts
//! from zero.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::{CHUNK_SIZE, CONNECT_TIMEOUT_SECS, PARTIAL_SUFFIX, STALL_TIMEOUT};
use super::error::DownloadError;
use crate::retry::{RetryPolicy, classify_error, retry_with_backoff};
use crate::staging::remove_if_exists;
use crate::user_agent::default_user_agent;

/// A completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Where the verified file now lives.
    pub path: PathBuf,
    /// Size of the file in bytes.
    pub bytes: u64,
    /// Attempts it took, including the successful one.
    pub attempts: u32,
}

/// A transfer that exhausted its retry budget or was cancelled.
#[derive(Debug)]
pub struct FetchFailure {
    /// Error from the final attempt.
    pub error: DownloadError,
    /// Attempts made.
    pub attempts: u32,
}

impl FetchFailure {
    /// True when the failure was caused by a shutdown request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}

/// Fetches one remote asset to a local path.
///
/// Implementations own their retry policy: a returned [`FetchFailure`] is the
/// final word for this item in this run.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads `url` to `destination`.
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<Fetched, FetchFailure>;
}

/// Tunables for [`HttpDownloader`].
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Maximum time without forward progress before a transfer is abandoned.
    pub stall_timeout: Duration,
    /// Write buffer size between the response stream and disk.
    pub chunk_size: usize,
    /// Attempt budget and delay between attempts.
    pub retry: RetryPolicy,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            stall_timeout: STALL_TIMEOUT,
            chunk_size: CHUNK_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

/// reqwest-backed [`Fetcher`].
///
/// Create once and share: the inner client pools connections.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    options: DownloadOptions,
}

impl HttpDownloader {
    /// Builds a downloader with the given options.
    ///
    /// No overall request timeout is set on the client; long transfers are
    /// bounded by the stall window instead.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot initialize.
    pub fn new(options: DownloadOptions) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .user_agent(default_user_agent())
            .gzip(true)
            .build()?;
        Ok(Self { client, options })
    }

    /// Returns the configured options.
    #[must_use]
    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// One attempt: GET, stream to the partial file, verify, rename.
    async fn fetch_once(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let partial = partial_path(destination);
        let result = match self.transfer(url, &partial, cancel).await {
            Ok(bytes) => tokio::fs::rename(&partial, destination)
                .await
                .map(|()| bytes)
                .map_err(|e| DownloadError::io(destination, e)),
            Err(error) => Err(error),
        };

        match result {
            Ok(bytes) => Ok(bytes),
            Err(error) => {
                debug!(path = %partial.display(), error = %error, "removing partial download");
                discard(&partial).await;
                discard(destination).await;
                Err(error)
            }
        }
    }

    async fn transfer(
        &self,
        url: &str,
        partial: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let stall = self.options.stall_timeout;
        let request = self.client.get(url).send();

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            sent = tokio::time::timeout(stall, request) => match sent {
                Err(_) => return Err(DownloadError::stalled(url, stall)),
                Ok(Err(e)) if e.is_timeout() => return Err(DownloadError::timeout(url)),
                Ok(Err(e)) => return Err(DownloadError::network(url, e)),
                Ok(Ok(response)) => response,
            },
        };

        if !response.status().is_success() {
            return Err(DownloadError::http_status(url, response.status().as_u16()));
        }

        let file = File::create(partial)
            .await
            .map_err(|e| DownloadError::io(partial, e))?;
        let mut writer = BufWriter::with_capacity(self.options.chunk_size, file);
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;
        let mut last_progress = Instant::now();

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
                next = tokio::time::timeout_at(last_progress + stall, stream.next()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    warn!(url, idle_secs = last_progress.elapsed().as_secs(), "transfer stalled");
                    return Err(DownloadError::stalled(url, stall));
                }
                Ok(None) => break,
                Ok(Some(Err(e))) if e.is_timeout() => return Err(DownloadError::timeout(url)),
                Ok(Some(Err(e))) => return Err(DownloadError::network(url, e)),
                Ok(Some(Ok(chunk))) => chunk,
            };

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(partial, e))?;
            bytes_written += chunk.len() as u64;
            last_progress = Instant::now();
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(partial, e))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| DownloadError::io(partial, e))?;

        if bytes_written == 0 {
            return Err(DownloadError::empty_body(url));
        }

        Ok(bytes_written)
    }
}

#[async_trait]
impl Fetcher for HttpDownloader {
    #[instrument(skip(self, cancel), fields(dest = %destination.display()))]
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<Fetched, FetchFailure> {
        if let Some(parent) = destination.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Err(FetchFailure {
                error: DownloadError::io(parent, e),
                attempts: 0,
            });
        }

        let outcome = retry_with_backoff(
            &self.options.retry,
            cancel,
            url,
            classify_error,
            |_attempt| self.fetch_once(url, destination, cancel),
        )
        .await;

        match outcome {
            Ok((bytes, attempts)) => {
                debug!(
                    path = %destination.display(),
                    bytes,
                    attempts,
                    "download complete"
                );
                Ok(Fetched {
                    path: destination.to_path_buf(),
                    bytes,
                    attempts,
                })
            }
            Err(exhausted) => {
                warn!(
                    error = %exhausted.error,
                    attempts = exhausted.attempts,
                    cancelled = exhausted.cancelled,
                    "download failed"
                );
                let error = if exhausted.cancelled && !exhausted.error.is_cancelled() {
                    DownloadError::cancelled(url)
                } else {
                    exhausted.error
                };
                Err(FetchFailure {
                    error,
                    attempts: exhausted.attempts,
                })
            }
        }
    }
}

/// Path a transfer streams into before it is verified: `<destination>.part`.
#[must_use]
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    destination.with_file_name(name)
}

async fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove partial file");
    }
}
