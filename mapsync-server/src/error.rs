//! Server error types.

use mapsync_protocol::{ConnectionError, DisconnectReason, RejectReason};
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] mapsync_protocol::ProtocolError),

    #[error("handshake rejected: {0}")]
    Rejected(RejectReason),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("idle timeout")]
    IdleTimeout,

    #[error("server shutting down")]
    ShuttingDown,
}

impl From<ConnectionError> for ServerError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Rejected(reason) => ServerError::Rejected(reason),
            ConnectionError::Protocol(e) => ServerError::Protocol(e),
            ConnectionError::Closed => ServerError::Io(std::io::ErrorKind::NotConnected.into()),
        }
    }
}

impl ServerError {
    /// Reason code sent to the peer when this error ends a connection.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            ServerError::Rejected(reason) => reason.disconnect_reason(),
            ServerError::Protocol(mapsync_protocol::ProtocolError::FrameTooLarge { .. }) => {
                DisconnectReason::FrameTooLarge
            }
            ServerError::Protocol(_) => DisconnectReason::MalformedFrame,
            ServerError::IdleTimeout => DisconnectReason::IdleTimeout,
            ServerError::ShuttingDown => DisconnectReason::ServerShutdown,
            _ => DisconnectReason::Normal,
        }
    }
}
