//! Welcome (2), server to client.
//!
//! Sent once the server has accepted the handshake; the connection is ready
//! for map data from then on.

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::packet::{Packet, PacketBody};
use crate::wire::{self, CodecLimits};

/// Welcome packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welcome {
    /// Mod version the server speaks.
    pub mod_version: String,
    /// Server-assigned session id.
    pub session_id: String,
}

impl Welcome {
    pub fn new(mod_version: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            mod_version: mod_version.into(),
            session_id: session_id.into(),
        }
    }
}

impl PacketBody for Welcome {
    const PACKET_ID: u16 = 2;
    const NAME: &'static str = "Welcome";

    fn write(&self, buf: &mut BytesMut, limits: &CodecLimits) -> Result<(), ProtocolError> {
        wire::write_string(buf, &self.mod_version, limits.max_string_len)?;
        wire::write_string(buf, &self.session_id, limits.max_string_len)
    }
}

/// Decodes a Welcome payload.
pub fn decode(buf: &mut Bytes, limits: &CodecLimits) -> Result<Packet, ProtocolError> {
    Ok(Packet::Welcome(Welcome {
        mod_version: wire::read_string(buf, limits.max_string_len)?,
        session_id: wire::read_string(buf, limits.max_string_len)?,
    }))
}
