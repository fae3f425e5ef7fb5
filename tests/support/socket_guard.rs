//! Skips network tests in sandboxes that forbid binding a local socket.

use std::io::ErrorKind;
use std::net::TcpListener;

use wiremock::MockServer;

/// Starts a mock server, or returns `None` (and logs why) when localhost
/// sockets are unavailable.
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    match TcpListener::bind("127.0.0.1:0") {
        Ok(listener) => drop(listener),
        Err(e) if matches!(e.kind(), ErrorKind::PermissionDenied | ErrorKind::AddrNotAvailable) => {
            eprintln!("skipping: cannot bind localhost socket ({e})");
            return None;
        }
        Err(e) => panic!("unexpected socket error: {e}"),
    }
    Some(MockServer::start().await)
}

/// Binds a raw localhost listener for hand-scripted servers, or returns
/// `None` when localhost sockets are unavailable.
pub async fn bind_local_or_skip() -> Option<tokio::net::TcpListener> {
    match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => Some(listener),
        Err(e) if matches!(e.kind(), ErrorKind::PermissionDenied | ErrorKind::AddrNotAvailable) => {
            eprintln!("skipping: cannot bind localhost socket ({e})");
            None
        }
        Err(e) => panic!("unexpected socket error: {e}"),
    }
}

/// Value returned by a test that skipped itself.
pub fn socket_skip_return() {}
