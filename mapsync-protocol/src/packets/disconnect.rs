//! Disconnect (3), either direction.
//!
//! Last packet before a peer closes the connection. The server sends one for
//! every rejected handshake and every fatal protocol error.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::error::ProtocolError;
use crate::packet::{Packet, PacketBody};
use crate::wire::{self, CodecLimits};

/// Why a connection is being closed.
///
/// The codes are part of the wire format and must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DisconnectReason {
    Normal = 0,
    ProtocolViolation = 1,
    VersionMismatch = 2,
    MalformedHandshake = 3,
    MalformedFrame = 4,
    FrameTooLarge = 5,
    ServerShutdown = 6,
    IdleTimeout = 7,
    ServerFull = 8,
}

impl DisconnectReason {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        Ok(match code {
            0 => DisconnectReason::Normal,
            1 => DisconnectReason::ProtocolViolation,
            2 => DisconnectReason::VersionMismatch,
            3 => DisconnectReason::MalformedHandshake,
            4 => DisconnectReason::MalformedFrame,
            5 => DisconnectReason::FrameTooLarge,
            6 => DisconnectReason::ServerShutdown,
            7 => DisconnectReason::IdleTimeout,
            8 => DisconnectReason::ServerFull,
            other => {
                return Err(ProtocolError::malformed(format!(
                    "unknown disconnect reason {other}"
                )))
            }
        })
    }

    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::Normal => "normal",
            DisconnectReason::ProtocolViolation => "protocol_violation",
            DisconnectReason::VersionMismatch => "version_mismatch",
            DisconnectReason::MalformedHandshake => "malformed_handshake",
            DisconnectReason::MalformedFrame => "malformed_frame",
            DisconnectReason::FrameTooLarge => "frame_too_large",
            DisconnectReason::ServerShutdown => "server_shutdown",
            DisconnectReason::IdleTimeout => "idle_timeout",
            DisconnectReason::ServerFull => "server_full",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disconnect packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: DisconnectReason,
    /// Human-readable explanation shown to the player.
    pub message: String,
}

impl Disconnect {
    pub fn new(reason: DisconnectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// A disconnect with no error attached.
    pub fn normal() -> Self {
        Self::new(DisconnectReason::Normal, "")
    }
}

impl PacketBody for Disconnect {
    const PACKET_ID: u16 = 3;
    const NAME: &'static str = "Disconnect";

    fn write(&self, buf: &mut BytesMut, limits: &CodecLimits) -> Result<(), ProtocolError> {
        buf.put_u8(self.reason.code());
        // Messages over the string limit are cut, the reason code always goes out
        let message = wire::truncate_str(&self.message, limits.max_string_len);
        wire::write_string(buf, message, limits.max_string_len)
    }
}

/// Decodes a Disconnect payload.
pub fn decode(buf: &mut Bytes, limits: &CodecLimits) -> Result<Packet, ProtocolError> {
    let reason = DisconnectReason::from_code(wire::read_u8(buf)?)?;
    let message = wire::read_string(buf, limits.max_string_len)?;
    Ok(Packet::Disconnect(Disconnect { reason, message }))
}
