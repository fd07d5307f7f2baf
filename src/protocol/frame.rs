//! Frame types with typed accessors.
//!
//! A [`Frame`] is the decoded content of one length-prefixed unit: either a
//! structured message (correlation id + payload) or a free-form fact.
//! [`Request`] and [`Reply`] interpret the payload of structured frames.
//!
//! # Example
//!
//! ```
//! use clipswire::protocol::Request;
//!
//! let request = Request::new(42, "assert", "(block G)");
//! let frame = request.to_frame();
//!
//! assert_eq!(frame.id(), Some(42));
//! assert_eq!(frame.payload(), b"assert (block G)");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    encode_length, read_id, MessageKind, DISCRIMINATOR_SIZE, ID_SIZE, LENGTH_SIZE, MAX_FRAME_SIZE,
    STRUCTURED, STRUCTURED_HEADER_SIZE,
};
use crate::error::{BridgeError, Result};

/// A complete protocol frame, without its length field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Discriminator `0x00`: a request or a reply.
    Structured {
        /// Correlation id.
        id: u32,
        /// Bytes after the correlation id.
        payload: Bytes,
    },
    /// Free-form text, asserted on the server or surfaced as a message on the client.
    Fact(Bytes),
}

impl Frame {
    /// Interpret the content of a frame (everything after the length field).
    ///
    /// Fails for empty content and for structured content too short to
    /// carry a correlation id.
    pub fn parse(content: Bytes) -> Result<Self> {
        let Some(&first) = content.first() else {
            return Err(BridgeError::MalformedFrame("empty frame".to_string()));
        };

        match MessageKind::from_discriminator(first) {
            MessageKind::Fact => Ok(Frame::Fact(content)),
            MessageKind::Structured => {
                let id = read_id(&content[DISCRIMINATOR_SIZE..]).ok_or_else(|| {
                    BridgeError::MalformedFrame(format!(
                        "structured frame of {} bytes has no correlation id",
                        content.len()
                    ))
                })?;
                let payload = content.slice(DISCRIMINATOR_SIZE + ID_SIZE..);
                Ok(Frame::Structured { id, payload })
            }
        }
    }

    /// Correlation id, `None` for fact messages.
    #[inline]
    pub fn id(&self) -> Option<u32> {
        match self {
            Frame::Structured { id, .. } => Some(*id),
            Frame::Fact(_) => None,
        }
    }

    /// Payload bytes: the body after the id, or the whole fact text.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::Structured { payload, .. } => payload,
            Frame::Fact(text) => text,
        }
    }

    /// Check if this is a fact message.
    #[inline]
    pub fn is_fact(&self) -> bool {
        matches!(self, Frame::Fact(_))
    }

    /// Fact text (lossy UTF-8), `None` for structured messages.
    pub fn fact_text(&self) -> Option<String> {
        match self {
            Frame::Fact(text) => Some(String::from_utf8_lossy(text).into_owned()),
            Frame::Structured { .. } => None,
        }
    }

    /// Encode the frame content (discriminator, id, payload) without the length field.
    pub fn content(&self) -> Bytes {
        match self {
            Frame::Structured { id, payload } => {
                let mut buf = BytesMut::with_capacity(DISCRIMINATOR_SIZE + ID_SIZE + payload.len());
                buf.put_u8(STRUCTURED);
                buf.put_u32_le(*id);
                buf.extend_from_slice(payload);
                buf.freeze()
            }
            Frame::Fact(text) => text.clone(),
        }
    }

    /// Encode the complete frame, length field included.
    pub fn encode(&self) -> Result<Vec<u8>> {
        build_frame(&self.content())
    }
}

/// A client-to-server command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Correlation id chosen by the caller.
    pub id: u32,
    /// Command name (`assert`, `run`, ...).
    pub command: String,
    /// Argument string, empty when the command takes none.
    pub args: String,
}

impl Request {
    /// Create a new request.
    pub fn new(id: u32, command: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            id,
            command: command.into(),
            args: args.into(),
        }
    }

    /// Build the structured frame carrying this request.
    ///
    /// The payload is the command, followed by a space and the arguments
    /// when there are any.
    pub fn to_frame(&self) -> Frame {
        let mut payload = BytesMut::with_capacity(self.command.len() + 1 + self.args.len());
        payload.extend_from_slice(self.command.as_bytes());
        if !self.args.is_empty() {
            payload.put_u8(b' ');
            payload.extend_from_slice(self.args.as_bytes());
        }
        Frame::Structured {
            id: self.id,
            payload: payload.freeze(),
        }
    }

    /// Decode a request from a structured frame.
    ///
    /// Zero padding is cut at the first NUL byte before the command and
    /// arguments are split on the first space.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let Frame::Structured { id, payload } = frame else {
            return Err(BridgeError::MalformedFrame(
                "fact message is not a request".to_string(),
            ));
        };

        let text = String::from_utf8_lossy(payload);
        let text = trim_nul(&text);
        let (command, args) = match text.split_once(' ') {
            Some((command, args)) => (command, args),
            None => (text, ""),
        };

        if command.is_empty() {
            return Err(BridgeError::MalformedFrame(format!(
                "request {id} has no command"
            )));
        }

        Ok(Self::new(*id, command, args))
    }

    /// Encode the complete request frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.to_frame().encode()
    }
}

/// A server-to-client answer, or an unsolicited status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Correlation id of the request, or the sentinel for status updates.
    pub id: u32,
    /// Whether the command succeeded.
    pub success: bool,
    /// Result text, possibly empty.
    pub result: String,
}

impl Reply {
    /// Longest result that fits in one reply frame.
    pub const MAX_RESULT_LEN: usize = MAX_FRAME_SIZE - STRUCTURED_HEADER_SIZE - 1;

    /// Create a new reply.
    pub fn new(id: u32, success: bool, result: impl Into<String>) -> Self {
        Self {
            id,
            success,
            result: result.into(),
        }
    }

    /// Failed reply with an empty result.
    pub fn failure(id: u32) -> Self {
        Self::new(id, false, String::new())
    }

    /// Build the structured frame carrying this reply.
    pub fn to_frame(&self) -> Frame {
        let mut payload = BytesMut::with_capacity(1 + self.result.len());
        payload.put_u8(u8::from(self.success));
        payload.extend_from_slice(self.result.as_bytes());
        Frame::Structured {
            id: self.id,
            payload: payload.freeze(),
        }
    }

    /// Decode a reply from a structured frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let Frame::Structured { id, payload } = frame else {
            return Err(BridgeError::MalformedFrame(
                "fact message is not a reply".to_string(),
            ));
        };

        let Some((&flag, result)) = payload.split_first() else {
            return Err(BridgeError::MalformedFrame(format!(
                "reply {id} has no success flag"
            )));
        };

        Ok(Self::new(
            *id,
            flag != 0,
            String::from_utf8_lossy(result).into_owned(),
        ))
    }

    /// Encode the complete reply frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.to_frame().encode()
    }

    /// Make the reply fit in a single frame.
    ///
    /// A result longer than [`MAX_RESULT_LEN`](Self::MAX_RESULT_LEN) is cut
    /// at a character boundary and the reply marked as failed, so the
    /// request is still answered. Returns whether the reply was cut.
    pub fn fit_to_frame(&mut self) -> bool {
        if self.result.len() <= Self::MAX_RESULT_LEN {
            return false;
        }
        let mut end = Self::MAX_RESULT_LEN;
        while !self.result.is_char_boundary(end) {
            end -= 1;
        }
        self.result.truncate(end);
        self.success = false;
        true
    }
}

/// Cut a string at its first NUL byte.
fn trim_nul(s: &str) -> &str {
    match s.find('\0') {
        Some(pos) => &s[..pos],
        None => s,
    }
}

/// Prefix `content` with its length field.
///
/// # Example
///
/// ```
/// use clipswire::protocol::build_frame;
///
/// let bytes = build_frame(b"hello").unwrap();
/// assert_eq!(bytes, b"\x07\x00hello");
/// ```
pub fn build_frame(content: &[u8]) -> Result<Vec<u8>> {
    let length = encode_length(content.len())?;
    let mut buf = Vec::with_capacity(LENGTH_SIZE + content.len());
    buf.extend_from_slice(&length);
    buf.extend_from_slice(content);
    Ok(buf)
}

/// Encode a request frame.
pub fn encode_request(id: u32, command: &str, args: &str) -> Result<Vec<u8>> {
    Request::new(id, command, args).encode()
}

/// Encode a reply frame.
pub fn encode_reply(id: u32, success: bool, result: &str) -> Result<Vec<u8>> {
    Reply::new(id, success, result).encode()
}

/// Build a fact frame from free-form text.
///
/// Text that is empty or starts with NUL cannot be told apart from an
/// empty or structured frame and is rejected.
pub fn fact_frame(text: &str) -> Result<Frame> {
    match text.as_bytes().first() {
        None => Err(BridgeError::MalformedFrame("empty fact message".to_string())),
        Some(&STRUCTURED) => Err(BridgeError::MalformedFrame(
            "fact message cannot start with NUL".to_string(),
        )),
        Some(_) => Ok(Frame::Fact(Bytes::copy_from_slice(text.as_bytes()))),
    }
}

/// Encode a fact frame.
pub fn encode_fact(text: &str) -> Result<Vec<u8>> {
    fact_frame(text)?.encode()
}
