//! Connection error types

use thiserror::Error;

/// Result alias for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Errors surfaced by a server connection.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    // ========================================================================
    // Transport
    // ========================================================================
    /// The request never produced a server response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The change feed dropped mid-stream.
    #[error("change feed interrupted: {0}")]
    FeedInterrupted(String),

    // ========================================================================
    // Server
    // ========================================================================
    /// The server answered with an error status.
    #[error("server rejected request with status {status}: {reason}")]
    Remote { status: u16, reason: String },

    /// The response body did not parse as the expected shape.
    #[error("malformed server response: {0}")]
    MalformedResponse(String),
}
