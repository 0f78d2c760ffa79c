//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during encoding, framing or dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown packet id: {0}")]
    UnknownPacketId(u16),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("string too long: {len} bytes (max {max})")]
    StringTooLong { len: usize, max: usize },

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Returns whether the connection must be closed after this error.
    ///
    /// Only an unknown packet id is survivable: it signals version skew
    /// between peers rather than corruption.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::UnknownPacketId(_))
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ProtocolError::MalformedFrame(msg.into())
    }
}
