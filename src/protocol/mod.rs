//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary protocol shared by client and server:
//! - 2-byte length field and discriminator helpers
//! - Peek-then-commit frame buffer for accumulating partial reads
//! - Frame, request and reply types with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{
    build_frame, encode_fact, encode_reply, encode_request, fact_frame, Frame, Reply, Request,
};
pub use frame_buffer::{try_decode_frame, Decoded, FrameBuffer};
pub use wire_format::{
    encode_length, peek_length, read_id, MessageKind, DISCRIMINATOR_SIZE, ID_SIZE, LENGTH_SIZE,
    MAX_FRAME_SIZE, SENTINEL_ID, STRUCTURED, STRUCTURED_HEADER_SIZE,
};
