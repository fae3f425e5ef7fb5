//! Shared User-Agent string for catalog, signing, and asset requests.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/basemap-ingest";

/// User-Agent sent with every outbound request.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("basemap-ingest/{version} (+{PROJECT_UA_URL})")
}
