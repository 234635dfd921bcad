//! Wire format encoding and decoding.
//!
//! The knowledge base speaks a line-oriented text protocol over a TCP
//! stream. Every message is a block of `\n`-separated lines closed by the
//! literal terminator line `#end#`:
//!
//! ```text
//! Request:            <method>\n(<json(arg)>\n)*#end#\n
//! Response (ok):      ok\n[<json(value)>\n]#end#\n
//! Response (error):   error\n<kind>\n<message>\n#end#\n
//! Event:              event\n<event id>\n<json(payload)>\n#end#\n
//! ```
//!
//! This module is pure and stateless: [`encode_request`] turns a call into
//! bytes, [`decode_frame`] turns one terminator-delimited chunk (terminator
//! already stripped by the [`FrameBuffer`](super::FrameBuffer)) into a
//! [`Frame`].

use bytes::Bytes;
use serde_json::Value;

use super::Frame;
use crate::error::{KbError, Result};

/// Message terminator token. One full line on the wire.
pub const MSG_SEPARATOR: &str = "#end#";

/// Default TCP port of the knowledge base server.
pub const DEFAULT_PORT: u16 = 6969;

/// Status token for a successful response.
pub const STATUS_OK: &str = "ok";

/// Status token for an error response.
pub const STATUS_ERROR: &str = "error";

/// Status token for an asynchronous event notification.
pub const STATUS_EVENT: &str = "event";

/// Encode a request as wire bytes.
///
/// Emits the method name on its own line, one line per JSON-serialized
/// argument, then the terminator line.
///
/// # Known limitation
///
/// The protocol has no escaping: the terminator token must never appear
/// verbatim inside a serialized argument. Arguments containing `#end#`
/// will desynchronize the server's framing.
///
/// # Errors
///
/// Returns [`KbError::Json`] if an argument cannot be serialized.
pub fn encode_request(method: &str, args: &[Value]) -> Result<Bytes> {
    let mut out = String::with_capacity(method.len() + 16 * args.len() + 8);
    out.push_str(method);
    out.push('\n');
    for arg in args {
        out.push_str(&serde_json::to_string(arg)?);
        out.push('\n');
    }
    out.push_str(MSG_SEPARATOR);
    out.push('\n');
    Ok(Bytes::from(out))
}

/// Decode one terminator-delimited chunk into a [`Frame`].
///
/// The chunk must already be stripped of the terminator. Surrounding
/// whitespace (including the newline that trailed the previous terminator)
/// is ignored. The first line is the status token; the remaining lines
/// depend on it:
///
/// - `ok` with one further line parses that line as the JSON result; with
///   no further line the result is absent.
/// - `error` requires a kind line and a message line.
/// - `event` requires an event id line and a JSON payload line.
///
/// # Errors
///
/// Returns [`KbError::Protocol`] for unknown status tokens, missing
/// fields, non-UTF-8 input, or unparseable JSON payloads.
pub fn decode_frame(chunk: &[u8]) -> Result<Frame> {
    let text = std::str::from_utf8(chunk)
        .map_err(|_| KbError::Protocol("non-UTF-8 bytes in message".to_string()))?;

    let mut lines = text.trim().split('\n');
    let status = lines.next().unwrap_or("");

    match status {
        STATUS_OK => match lines.next() {
            Some(raw) => Ok(Frame::Ok(Some(parse_value(raw)?))),
            None => Ok(Frame::Ok(None)),
        },
        STATUS_ERROR => {
            let kind = lines
                .next()
                .ok_or_else(|| KbError::Protocol("error response without a kind".to_string()))?;
            let message = lines.next().ok_or_else(|| {
                KbError::Protocol("error response without a message".to_string())
            })?;
            Ok(Frame::Error {
                kind: kind.to_string(),
                message: message.to_string(),
            })
        }
        STATUS_EVENT => {
            let id = lines
                .next()
                .ok_or_else(|| KbError::Protocol("event without an id".to_string()))?;
            let raw = lines
                .next()
                .ok_or_else(|| KbError::Protocol("event without a payload".to_string()))?;
            Ok(Frame::Event {
                id: id.to_string(),
                payload: parse_value(raw)?,
            })
        }
        other => Err(KbError::Protocol(format!(
            "unexpected message status: {:?}",
            other
        ))),
    }
}

/// Parse one JSON value line. Strict JSON only, no legacy literal mode.
fn parse_value(raw: &str) -> Result<Value> {
    serde_json::from_str(raw.trim())
        .map_err(|e| KbError::Protocol(format!("invalid JSON payload: {}", e)))
}
