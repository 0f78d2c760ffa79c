//! Client error types.

use mapsync_protocol::DisconnectReason;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] mapsync_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out")]
    Timeout,

    #[error("rejected by server ({reason}): {message}")]
    Rejected {
        reason: DisconnectReason,
        message: String,
    },

    #[error("unexpected {0} packet")]
    UnexpectedPacket(&'static str),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::Rejected { reason, .. } => matches!(
                reason,
                DisconnectReason::ServerShutdown
                    | DisconnectReason::IdleTimeout
                    | DisconnectReason::ServerFull
            ),
            _ => false,
        }
    }
}
