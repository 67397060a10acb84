//! Error types for the WebSocket engine
//!
//! Nothing in the engine panics or propagates errors across component
//! boundaries at runtime. These values are returned from the receiver for
//! the chunk being parsed, from configuration validation, and from the
//! fallible send APIs so callers can decide what to do.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::MAX_CONTROL_PAYLOAD;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// WebSocket engine error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Protocol violation in the inbound byte stream
    Protocol(&'static str),
    /// Declared frame length exceeds the configured maximum
    FrameTooLarge(u64),
    /// Capacity exceeded (queue full, ids exhausted)
    Capacity(&'static str),
    /// Operation not allowed in the session's current state
    InvalidState(&'static str),
    /// Invalid close code
    InvalidCloseCode(u16),
    /// Rejected configuration
    InvalidConfig(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::FrameTooLarge(len) => write!(f, "Frame too large: {} bytes", len),
            Error::Capacity(msg) => write!(f, "Capacity exceeded: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidCloseCode(code) => write!(f, "Invalid close code: {}", code),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Close frame reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code
    pub code: u16,
    /// Optional reason string
    pub reason: String,
}

impl CloseReason {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Going away (e.g., server shutdown)
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Unsupported data
    pub const UNSUPPORTED: u16 = 1003;
    /// No status received
    pub const NO_STATUS: u16 = 1005;
    /// Abnormal closure
    pub const ABNORMAL: u16 = 1006;
    /// Invalid frame payload
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Policy violation
    pub const POLICY: u16 = 1008;
    /// Message too big
    pub const TOO_BIG: u16 = 1009;
    /// Mandatory extension
    pub const EXTENSION: u16 = 1010;
    /// Internal server error
    pub const INTERNAL: u16 = 1011;

    /// Longest reason text that still fits a control frame next to the code
    pub const MAX_REASON_LEN: usize = MAX_CONTROL_PAYLOAD - 2;

    /// Create a new close reason
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Check if the close code is valid per RFC 6455
    pub fn is_valid_code(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
    }

    /// Codes above GOING_AWAY are reported to the application as errors
    #[inline]
    pub fn is_error(&self) -> bool {
        self.code > Self::GOING_AWAY
    }

    /// Parse a close frame payload.
    ///
    /// Returns `None` when the payload carries no status code. A reason
    /// that is not valid UTF-8 is decoded lossily.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 2 {
            return None;
        }
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
        Some(Self::new(code, reason))
    }

    /// Encode as a close frame payload: big-endian code then the reason,
    /// truncated on a character boundary to fit 125 bytes.
    pub fn encode(&self) -> Bytes {
        let mut end = self.reason.len().min(Self::MAX_REASON_LEN);
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut payload = BytesMut::with_capacity(2 + end);
        payload.put_u16(self.code);
        payload.put_slice(&self.reason.as_bytes()[..end]);
        payload.freeze()
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}
