//! Error types for oro-client.

use thiserror::Error;

/// Main error type for all knowledge base operations.
#[derive(Debug, Error)]
pub enum KbError {
    /// I/O error during socket operations (includes connection refused).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error on call arguments.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (unknown status token, missing fields, bad payload).
    ///
    /// After this error the connection should be treated as no longer
    /// trustworthy.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered a call with an `error` status.
    ///
    /// Local to the call that triggered it; the session stays usable.
    #[error("{kind}: {message}")]
    Remote { kind: String, message: String },

    /// Invalid subscription request (e.g. ambiguous event variable).
    ///
    /// Raised before any network interaction.
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    /// Connection closed while a call was pending or before it was sent.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Client-side deadline elapsed waiting for a response.
    ///
    /// The call fails but the session may continue if the connection is
    /// still open. Treat the connection as suspect.
    #[error("Call timed out")]
    Timeout,
}

/// Result type alias using KbError.
pub type Result<T> = std::result::Result<T, KbError>;
