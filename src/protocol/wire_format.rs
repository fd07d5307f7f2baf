//! Wire format constants and header helpers.
//!
//! Every frame on the wire starts with a 2-byte length that counts the
//! whole frame, itself included:
//! ```text
//! ┌──────────┬───────────────┬───────────────┬──────────────┐
//! │ Length   │ Discriminator │ Correlation ID│ Payload      │
//! │ 2 bytes  │ 1 byte        │ 4 bytes       │ variable     │
//! │ uint16 LE│ 0x00 = struct │ uint32 LE     │              │
//! └──────────┴───────────────┴───────────────┴──────────────┘
//! ```
//!
//! The correlation ID is only present when the discriminator is `0x00`.
//! Any other leading byte starts a free-form fact message.
//!
//! All multi-byte integers are Little Endian.

use crate::error::{BridgeError, Result};

/// Size of the length field in bytes.
pub const LENGTH_SIZE: usize = 2;

/// Size of the discriminator byte.
pub const DISCRIMINATOR_SIZE: usize = 1;

/// Size of the correlation ID.
pub const ID_SIZE: usize = 4;

/// Bytes preceding the payload of a structured message (length + discriminator + id).
pub const STRUCTURED_HEADER_SIZE: usize = LENGTH_SIZE + DISCRIMINATOR_SIZE + ID_SIZE;

/// Largest frame the 16-bit length field can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Discriminator value marking a structured (request/reply) message.
pub const STRUCTURED: u8 = 0x00;

/// Correlation ID reserved for unsolicited status replies.
pub const SENTINEL_ID: u32 = 0xFFFF_FFFF;

/// Kind of message carried by a frame, decided by its first content byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Discriminator `0x00`: correlation id and command/reply payload follow.
    Structured,
    /// Any other leading byte: the whole content is free-form fact text.
    Fact,
}

impl MessageKind {
    /// Classify a frame by its first content byte.
    #[inline]
    pub fn from_discriminator(byte: u8) -> Self {
        if byte == STRUCTURED {
            MessageKind::Structured
        } else {
            MessageKind::Fact
        }
    }
}

/// Encode the length field for a frame whose content is `content_len` bytes.
///
/// Fails when the resulting frame would not fit in 16 bits.
///
/// # Example
///
/// ```
/// use clipswire::protocol::encode_length;
///
/// // 5 bytes of content + 2 bytes of length field
/// assert_eq!(encode_length(5).unwrap(), [7, 0]);
/// ```
pub fn encode_length(content_len: usize) -> Result<[u8; LENGTH_SIZE]> {
    let total = content_len + LENGTH_SIZE;
    let total = u16::try_from(total).map_err(|_| BridgeError::FrameTooLarge { size: total })?;
    Ok(total.to_le_bytes())
}

/// Read the length field without consuming it.
///
/// Returns `None` if fewer than two bytes are available.
#[inline]
pub fn peek_length(buf: &[u8]) -> Option<u16> {
    match buf {
        [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

/// Read a little-endian correlation ID from the first four bytes of `buf`.
#[inline]
pub fn read_id(buf: &[u8]) -> Option<u32> {
    let bytes: [u8; ID_SIZE] = buf.get(..ID_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_counts_itself() {
        assert_eq!(encode_length(0).unwrap(), [2, 0]);
        assert_eq!(encode_length(0x0100).unwrap(), [0x02, 0x01]);
    }

    #[test]
    fn test_length_little_endian_roundtrip() {
        let bytes = encode_length(1000).unwrap();
        assert_eq!(peek_length(&bytes), Some(1002));
    }

    #[test]
    fn test_length_at_limit() {
        assert!(encode_length(MAX_FRAME_SIZE - LENGTH_SIZE).is_ok());

        let result = encode_length(MAX_FRAME_SIZE - LENGTH_SIZE + 1);
        assert!(matches!(
            result,
            Err(BridgeError::FrameTooLarge { size }) if size == MAX_FRAME_SIZE + 1
        ));
    }

    #[test]
    fn test_peek_length_short_buffer() {
        assert_eq!(peek_length(&[]), None);
        assert_eq!(peek_length(&[7]), None);
    }

    #[test]
    fn test_read_id_little_endian() {
        assert_eq!(read_id(&[0x78, 0x56, 0x34, 0x12]), Some(0x1234_5678));
        assert_eq!(read_id(&[0xFF; 4]), Some(SENTINEL_ID));
        assert_eq!(read_id(&[1, 2, 3]), None);
    }

    #[test]
    fn test_discriminator_classification() {
        assert_eq!(MessageKind::from_discriminator(0), MessageKind::Structured);
        assert_eq!(MessageKind::from_discriminator(b'h'), MessageKind::Fact);
        assert_eq!(MessageKind::from_discriminator(0xFF), MessageKind::Fact);
    }

    #[test]
    fn test_structured_header_size() {
        assert_eq!(STRUCTURED_HEADER_SIZE, 7);
    }
}
