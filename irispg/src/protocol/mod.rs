//! PostgreSQL frontend/backend protocol v3 messages.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
//!
//! The server decodes [`frontend`] messages received from clients and
//! encodes [`backend`] messages sent back to them.
pub mod backend;
pub mod frontend;

pub use backend::BackendProtocol;
pub use frontend::{FrontendMessage, FrontendProtocol, StartupMessage};

/// The protocol version number, major `3` minor `0`.
pub const PROTOCOL_VERSION: i32 = 196_608;

/// Magic code of the untyped SSL negotiation request.
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Magic code of the untyped cancel request.
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Magic code of the untyped GSSAPI encryption request.
pub const GSSENC_REQUEST_CODE: i32 = 80877104;

/// Hard ceiling on the declared frame length; anything larger is treated
/// as a framing violation rather than an allocation request.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// An error when a message violates the wire protocol framing rules.
pub struct ProtocolError {
    message: String,
}

impl ProtocolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// Client sent a message type the server does not recognize.
    pub fn unknown(msgtype: u8) -> Self {
        Self::new(format!(
            "unknown message type {:?} ({msgtype:#04x})",
            char::from(msgtype),
        ))
    }

    /// Client sent a well-formed message at the wrong point of the session.
    pub fn unexpected(name: &str, phase: &str) -> Self {
        Self::new(format!("unexpected {name} message during {phase}"))
    }

    /// Message body ended before all declared fields were read.
    pub fn truncated(name: &str) -> Self {
        Self::new(format!("truncated {name} message body"))
    }

    /// Declared frame length is outside the accepted range.
    pub fn bad_length(len: i64) -> Self {
        Self::new(format!(
            "invalid message length {len}: must be between 4 and {MAX_FRAME_LEN}",
        ))
    }
}

impl std::error::Error for ProtocolError { }

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "protocol violation: {}", self.message)
    }
}

impl std::fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}
