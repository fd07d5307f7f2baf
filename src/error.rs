//! Error types for clipswire.

use thiserror::Error;

use crate::engine::EngineError;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while reading a configuration file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame header or body could not be interpreted.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Encoded frame does not fit the 16-bit length field.
    #[error("Frame of {size} bytes exceeds the 65535 byte limit")]
    FrameTooLarge {
        /// Size the frame would have had on the wire.
        size: usize,
    },

    /// Connection closed, or aborted while a call was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Outbound queue stayed full past the backpressure timeout.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// Command name not recognised by the router.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Argument rejected by a command's validation rule.
    #[error("Invalid argument {argument:?} for command {command}")]
    InvalidArgument {
        /// Command that rejected the argument.
        command: String,
        /// The offending argument.
        argument: String,
    },

    /// The engine reported a failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Configuration could not be assembled.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
