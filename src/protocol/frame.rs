//! Frame type with typed accessors.
//!
//! A [`Frame`] is one decoded, terminator-delimited unit of the wire
//! protocol: either the response to the single in-flight call, or an
//! unsolicited event notification.

use serde_json::Value;

/// A complete decoded protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Successful response, with an optional JSON result.
    Ok(Option<Value>),
    /// Error response from the server.
    Error {
        /// Error kind reported by the server (e.g. `KbServerError`).
        kind: String,
        /// Human-readable error message.
        message: String,
    },
    /// Asynchronous event notification for a subscription.
    Event {
        /// Server-assigned event id.
        id: String,
        /// Event payload (content depends on the event type).
        payload: Value,
    },
}

impl Frame {
    /// Check if this frame answers a call (ok or error).
    #[inline]
    pub fn is_response(&self) -> bool {
        !self.is_event()
    }

    /// Check if this is an error response.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error { .. })
    }

    /// Check if this is an event notification.
    #[inline]
    pub fn is_event(&self) -> bool {
        matches!(self, Frame::Event { .. })
    }
}
