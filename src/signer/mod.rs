//! URL authorization step run before an asset is downloaded.
//!
//! Some catalogs hand out blob URLs that are only readable with a short-lived
//! token. A [`UrlSigner`] turns the raw href into a URL the downloader can
//! fetch. Retry is not handled here: the orchestrator wraps every call in the
//! shared retry loop with its own fixed-delay policy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::retry::FailureType;
use crate::user_agent::default_user_agent;

/// Planetary Computer SAS signing endpoint.
pub const PLANETARY_COMPUTER_SIGN_ENDPOINT: &str =
    "https://planetarycomputer.microsoft.com/api/sas/v1/sign";

const SIGN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors returned by a signing attempt.
#[derive(Debug, Error)]
pub enum SignError {
    /// The signing service could not be reached.
    #[error("network error signing {url}: {source}")]
    Network {
        /// The raw asset URL being signed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The signing service answered with a non-success status.
    #[error("signing service returned HTTP {status} for {url}")]
    HttpStatus {
        /// The raw asset URL being signed.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The response did not contain a usable signed URL.
    #[error("malformed signing response for {url}: {reason}")]
    MalformedResponse {
        /// The raw asset URL being signed.
        url: String,
        /// What was wrong with the body.
        reason: String,
    },

    /// The signing client could not be constructed.
    #[error("failed to build signing client: {0}")]
    Client(#[source] reqwest::Error),

    /// Shutdown was requested while signing.
    #[error("signing {url} cancelled")]
    Cancelled {
        /// The raw asset URL being signed.
        url: String,
    },
}

impl SignError {
    /// Retry classification: every failure of the remote service is worth another try.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::Network { .. } | Self::HttpStatus { .. } | Self::MalformedResponse { .. } => {
                FailureType::Transient
            }
            Self::Client(_) => FailureType::Permanent,
            Self::Cancelled { .. } => FailureType::Cancelled,
        }
    }
}

/// Resolves a raw asset URL into a downloadable one.
#[async_trait]
pub trait UrlSigner: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Returns a URL that can be fetched directly.
    async fn sign(&self, url: &str) -> Result<String, SignError>;
}

/// Signer for catalogs whose hrefs are already public.
#[derive(Debug, Default)]
pub struct PassthroughSigner;

#[async_trait]
impl UrlSigner for PassthroughSigner {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    async fn sign(&self, url: &str) -> Result<String, SignError> {
        Ok(url.to_string())
    }
}

/// Signer backed by a SAS token endpoint: `GET <endpoint>?href=<url>` returning
/// `{"href": "<signed url>"}`.
#[derive(Debug, Clone)]
pub struct SasTokenSigner {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct SignedHref {
    href: String,
}

impl SasTokenSigner {
    /// Creates a signer for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`SignError::Client`] when the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SignError> {
        let client = Client::builder()
            .timeout(SIGN_REQUEST_TIMEOUT)
            .user_agent(default_user_agent())
            .build()
            .map_err(SignError::Client)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// The configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_url(&self, url: &str) -> String {
        format!("{}?href={}", self.endpoint, urlencoding::encode(url))
    }
}

#[async_trait]
impl UrlSigner for SasTokenSigner {
    fn name(&self) -> &'static str {
        "sas-token"
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn sign(&self, url: &str) -> Result<String, SignError> {
        let response = self
            .client
            .get(self.request_url(url))
            .send()
            .await
            .map_err(|source| SignError::Network {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body: SignedHref =
            response
                .json()
                .await
                .map_err(|e| SignError::MalformedResponse {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        if body.href.trim().is_empty() {
            return Err(SignError::MalformedResponse {
                url: url.to_string(),
                reason: "empty href".to_string(),
            });
        }

        debug!("asset url signed");
        Ok(body.href)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_returns_input() {
        let signer = PassthroughSigner;
        let signed = signer.sign("https://example.com/a.tif").await.unwrap();
        assert_eq!(signed, "https://example.com/a.tif");
        assert_eq!(signer.name(), "passthrough");
    }

    #[test]
    fn test_sas_request_url_encodes_href() {
        let signer = SasTokenSigner::new("https://sign.example.com/api/sign").unwrap();
        let url = signer.request_url("https://blob.example.com/naip/a b.tif?x=1");
        assert_eq!(
            url,
            "https://sign.example.com/api/sign?href=https%3A%2F%2Fblob.example.com%2Fnaip%2Fa%20b.tif%3Fx%3D1"
        );
    }

    #[test]
    fn test_sign_error_classification() {
        let err = SignError::HttpStatus {
            url: "u".to_string(),
            status: 503,
        };
        assert_eq!(err.failure_type(), FailureType::Transient);
        let err = SignError::MalformedResponse {
            url: "u".to_string(),
            reason: "missing href".to_string(),
        };
        assert_eq!(err.failure_type(), FailureType::Transient);
    }
}
