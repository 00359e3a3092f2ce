//! Error types for the WebSocket engine
//!
//! Frame-level failures carry the close code the connection answers with,
//! see [`Error::close_code`]. Handshake failures are answered with an HTTP
//! status instead of a close frame and surface as
//! [`Error::HandshakeRejected`].

use std::fmt;
use std::io;

/// Result type alias for WebSocket operations
pub type Result<T> = std::result::Result<T, Error>;

/// WebSocket error types
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying socket
    Io(io::Error),
    /// Protocol violation (bad reserved bits, bad opcode, unmasked frame, ...)
    Protocol(&'static str),
    /// Malformed close frame payload
    InvalidClosePayload(&'static str),
    /// Close frame carrying a code outside the RFC 6455 ranges
    InvalidCloseCode(u16),
    /// Invalid UTF-8 in a text message
    InvalidUtf8,
    /// Declared or accumulated message size over the configured maximum
    MessageTooLarge,
    /// Single frame payload over the configured maximum
    FrameTooLarge,
    /// Decoder already failed; no further frames are produced
    DecoderFailed,
    /// Invalid HTTP request head
    InvalidHttp(&'static str),
    /// Upgrade refused with the given HTTP status
    HandshakeRejected(http::StatusCode),
    /// Operation not allowed in the current connection state
    InvalidState(&'static str),
    /// Connection closed
    ConnectionClosed,
    /// Connection reset by peer
    ConnectionReset,
}

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

    /// Create a new close reason
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Check if the close code may appear on the wire per RFC 6455
    pub fn is_valid_code(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
    }
}

/// Coarse error classification surfaced to the application with
/// [`crate::connection::Event::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Peer violated the framing protocol
    Protocol,
    /// Text payload was not UTF-8
    InvalidPayload,
    /// Message or frame over the configured limits
    TooLarge,
    /// Socket-level failure
    Transport,
    /// Close handshake did not complete in time
    CloseTimeout,
}

impl Error {
    /// Close code the connection sends when this error ends it
    ///
    /// Returns `None` for errors that are not caused by the peer's frames.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Error::Protocol(_)
            | Error::InvalidClosePayload(_)
            | Error::InvalidCloseCode(_)
            | Error::DecoderFailed => Some(CloseReason::PROTOCOL_ERROR),
            Error::InvalidUtf8 => Some(CloseReason::INVALID_PAYLOAD),
            Error::MessageTooLarge | Error::FrameTooLarge => Some(CloseReason::TOO_BIG),
            _ => None,
        }
    }

    /// Classify this error for the application
    pub fn kind(&self) -> ErrorKind {
        match self.close_code() {
            Some(CloseReason::INVALID_PAYLOAD) => ErrorKind::InvalidPayload,
            Some(CloseReason::TOO_BIG) => ErrorKind::TooLarge,
            Some(_) => ErrorKind::Protocol,
            None => ErrorKind::Transport,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::InvalidClosePayload(msg) => write!(f, "Invalid close payload: {}", msg),
            Error::InvalidCloseCode(code) => write!(f, "Invalid close code: {}", code),
            Error::InvalidUtf8 => write!(f, "Invalid UTF-8 in text message"),
            Error::MessageTooLarge => write!(f, "Message too large"),
            Error::FrameTooLarge => write!(f, "Frame too large"),
            Error::DecoderFailed => write!(f, "Decoder is in the failed state"),
            Error::InvalidHttp(msg) => write!(f, "Invalid HTTP: {}", msg),
            Error::HandshakeRejected(status) => write!(f, "Handshake rejected: {}", status),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::ConnectionReset => write!(f, "Connection reset by peer"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset => Error::ConnectionReset,
            io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(e),
        }
    }
}
