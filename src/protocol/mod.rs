//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the line-oriented text protocol:
//! - Request encoding and response/event decoding
//! - Frame buffer for accumulating partial reads
//! - Frame enum with typed accessors

mod frame;
mod frame_buffer;
mod wire;

pub use frame::Frame;
pub use frame_buffer::FrameBuffer;
pub use wire::{
    decode_frame, encode_request, DEFAULT_PORT, MSG_SEPARATOR, STATUS_ERROR, STATUS_EVENT,
    STATUS_OK,
};
