//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. The stream has no length
//! prefix: a message is complete when the `#end#` terminator shows up in
//! the accumulated bytes. Everything before the terminator is one chunk,
//! everything after it is retained for the next message.
//!
//! # Example
//!
//! ```ignore
//! use oro_client::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in arbitrary fragments from the socket
//! let frames = buffer.push(b"ok\n[\"alf")?;
//! assert!(frames.is_empty());
//! let frames = buffer.push(b"red\"]\n#end#\n")?;
//! assert_eq!(frames.len(), 1);
//! ```

use bytes::{Buf, Bytes, BytesMut};

use super::wire::{decode_frame, MSG_SEPARATOR};
use super::Frame;
use crate::error::Result;

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
}

impl FrameBuffer {
    /// Create a new empty frame buffer.
    ///
    /// Default capacity: 8 KiB (messages are short text lines).
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// This is the main API for processing incoming data from the socket.
    /// Returns the decoded frames, in stream order. Partial data is
    /// buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns an error if a complete chunk does not decode into a valid
    /// frame. The buffer contents past the offending chunk are dropped;
    /// the connection should be torn down by the caller.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(chunk) = self.take_chunk() {
            frames.push(decode_frame(&chunk)?);
        }

        Ok(frames)
    }

    /// Split off the next terminator-delimited chunk, terminator excluded.
    ///
    /// Returns `None` if the buffer holds no complete message yet.
    fn take_chunk(&mut self) -> Option<Bytes> {
        let sep = MSG_SEPARATOR.as_bytes();
        let pos = self
            .buffer
            .windows(sep.len())
            .position(|window| window == sep)?;

        let chunk = self.buffer.split_to(pos).freeze();
        self.buffer.advance(sep.len());
        Some(chunk)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
