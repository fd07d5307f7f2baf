//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. Decoding follows a
//! peek-then-commit discipline: the length field is only peeked, and bytes
//! are split off the buffer once the whole frame they announce is present.
//!
//! # Example
//!
//! ```
//! use clipswire::protocol::{encode_request, FrameBuffer};
//!
//! let bytes = encode_request(1, "reset", "").unwrap();
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&bytes[..4]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[4..]).unwrap();
//!
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].id(), Some(1));
//! ```

use bytes::{Bytes, BytesMut};
use tracing::warn;

use super::wire_format::{peek_length, LENGTH_SIZE};
use super::Frame;
use crate::error::{BridgeError, Result};

/// Default initial capacity of the receive buffer.
const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Outcome of a single decode attempt.
#[derive(Debug)]
pub enum Decoded {
    /// Not enough bytes for the announced frame; nothing was consumed.
    Incomplete,
    /// A complete frame occupying the first `consumed` bytes.
    Frame {
        /// The decoded frame.
        frame: Frame,
        /// Bytes to drop from the front of the buffer.
        consumed: usize,
    },
    /// A complete but unusable frame; its bytes must be dropped and decoding continues.
    Discarded {
        /// Bytes to drop from the front of the buffer.
        consumed: usize,
        /// Why the frame was discarded.
        reason: String,
    },
}

/// Try to decode one frame from the front of `buf`.
///
/// Never reads past the frame boundary announced by the length field and
/// never assumes bytes are consumed: the caller drops `consumed` bytes only
/// when a `Frame` or `Discarded` outcome is returned.
///
/// # Errors
///
/// A length field smaller than itself cannot mark any frame boundary, so
/// the stream cannot resynchronize and a `MalformedFrame` error is returned.
pub fn try_decode_frame(buf: &[u8]) -> Result<Decoded> {
    let Some(length) = peek_length(buf) else {
        return Ok(Decoded::Incomplete);
    };
    let length = usize::from(length);

    if length < LENGTH_SIZE {
        return Err(BridgeError::MalformedFrame(format!(
            "length field {length} is smaller than the header"
        )));
    }

    if buf.len() < length {
        return Ok(Decoded::Incomplete);
    }

    if length == LENGTH_SIZE {
        return Ok(Decoded::Discarded {
            consumed: length,
            reason: "empty frame".to_string(),
        });
    }

    let content = Bytes::copy_from_slice(&buf[LENGTH_SIZE..length]);
    match Frame::parse(content) {
        Ok(frame) => Ok(Decoded::Frame {
            frame,
            consumed: length,
        }),
        Err(e) => Ok(Decoded::Discarded {
            consumed: length,
            reason: e.to_string(),
        }),
    }
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// All data is stored in a single `BytesMut` buffer to minimize allocations.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
}

impl FrameBuffer {
    /// Create a new frame buffer with a 64KB initial capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new frame buffer with custom initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Frames are returned in wire order. Partial data stays buffered for
    /// the next push. Empty or malformed frames are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be resynchronized; the
    /// connection should be dropped.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Extract a single frame, skipping over discarded ones.
    ///
    /// Returns `Ok(None)` when more data is needed.
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match try_decode_frame(&self.buffer)? {
                Decoded::Incomplete => return Ok(None),
                Decoded::Frame { frame, consumed } => {
                    let _ = self.buffer.split_to(consumed);
                    return Ok(Some(frame));
                }
                Decoded::Discarded { consumed, reason } => {
                    warn!(bytes = consumed, %reason, "discarding frame");
                    let _ = self.buffer.split_to(consumed);
                }
            }
        }
    }

    /// Append data to the buffer without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_fact, encode_reply, encode_request, Reply, Request};

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let bytes = encode_request(42, "assert", "(block G)").unwrap();

        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        let request = Request::from_frame(&frames[0]).unwrap();
        assert_eq!(request, Request::new(42, "assert", "(block G)"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = Vec::new();
        combined.extend(encode_request(1, "reset", "").unwrap());
        combined.extend(encode_fact("hello").unwrap());
        combined.extend(encode_reply(3, true, "done").unwrap());

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].id(), Some(1));
        assert_eq!(frames[1].fact_text().as_deref(), Some("hello"));
        assert_eq!(
            Reply::from_frame(&frames[2]).unwrap(),
            Reply::new(3, true, "done")
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_incomplete_leaves_buffer_untouched() {
        let bytes = encode_request(9, "run", "-1").unwrap();

        for cut in 0..bytes.len() {
            assert!(matches!(
                try_decode_frame(&bytes[..cut]).unwrap(),
                Decoded::Incomplete
            ));
        }

        let mut buffer = FrameBuffer::new();
        buffer.push(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(buffer.len(), bytes.len() - 1);
    }

    #[test]
    fn test_byte_at_a_time() {
        let bytes = encode_request(5, "print", "facts").unwrap();
        let mut buffer = FrameBuffer::new();

        let mut all_frames = Vec::new();
        for byte in &bytes {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(
            Request::from_frame(&all_frames[0]).unwrap(),
            Request::new(5, "print", "facts")
        );
    }

    #[test]
    fn test_arbitrary_splits_match_whole_decode() {
        let mut stream = Vec::new();
        stream.extend(encode_request(1, "assert", "(a b c)").unwrap());
        stream.extend(encode_fact("some fact text").unwrap());
        stream.extend(encode_request(2, "query", "(facts)").unwrap());

        let whole = FrameBuffer::new().push(&stream).unwrap();

        for chunk in [1, 2, 3, 5, 7, 11] {
            let mut buffer = FrameBuffer::new();
            let mut frames = Vec::new();
            for piece in stream.chunks(chunk) {
                frames.extend(buffer.push(piece).unwrap());
            }
            assert_eq!(frames, whole, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_empty_frame_discarded() {
        let mut stream = vec![2, 0];
        stream.extend(encode_fact("after").unwrap());

        let frames = FrameBuffer::new().push(&stream).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].fact_text().as_deref(), Some("after"));
    }

    #[test]
    fn test_truncated_structured_frame_discarded() {
        // Structured discriminator but only two id bytes.
        let mut stream = vec![5, 0, 0, 1, 2];
        stream.extend(encode_request(8, "clear", "").unwrap());

        let frames = FrameBuffer::new().push(&stream).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id(), Some(8));
    }

    #[test]
    fn test_length_below_header_is_fatal() {
        let mut buffer = FrameBuffer::new();
        let result = buffer.push(&[1, 0, 0xAA]);
        assert!(matches!(result, Err(BridgeError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_reports_consumed() {
        let bytes = encode_reply(4, false, "").unwrap();
        let mut padded = bytes.clone();
        padded.extend_from_slice(&[0xAB, 0xCD]);

        match try_decode_frame(&padded).unwrap() {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(consumed, bytes.len());
                assert_eq!(Reply::from_frame(&frame).unwrap(), Reply::failure(4));
            }
            other => panic!("unexpected decode outcome: {other:?}"),
        }
    }

    #[test]
    fn test_clear() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&[9, 0, 1]);
        assert!(!buffer.is_empty());

        buffer.clear();
        assert!(buffer.is_empty());
    }
}
