//! Error types for the streaming session

/// WebSocket connect timeout in seconds
pub(super) const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Seconds to wait for the session-opened message after the socket opens
pub(super) const OPEN_TIMEOUT_SECS: u64 = 15;

/// Seconds to wait for the service to confirm closure before
/// force-terminating the connection
pub(super) const CLOSE_TIMEOUT_SECS: u64 = 5;

/// Errors that can occur while opening a streaming session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection timeout - service did not respond within {CONNECT_TIMEOUT_SECS} seconds")]
    ConnectionTimeout,

    #[error("Handshake failed: connection closed before a session id was assigned")]
    HandshakeFailed,
}
