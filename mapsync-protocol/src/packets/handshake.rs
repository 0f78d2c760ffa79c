//! Handshake (1), client to server.
//!
//! First packet on every connection. Establishes which mod version the peer
//! speaks and which player, game server and world the session belongs to.

use bytes::{Bytes, BytesMut};
use std::fmt;

use crate::error::ProtocolError;
use crate::packet::{Packet, PacketBody};
use crate::wire::{self, CodecLimits};

/// Handshake packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Semantic version of the mod/protocol.
    pub mod_version: String,
    /// Player name.
    pub username: String,
    /// Game server the client is playing on, e.g. `play.example.com:25565`.
    pub game_address: String,
    /// World or dimension identifier.
    pub world: String,
}

impl Handshake {
    pub fn new(
        mod_version: impl Into<String>,
        username: impl Into<String>,
        game_address: impl Into<String>,
        world: impl Into<String>,
    ) -> Self {
        Self {
            mod_version: mod_version.into(),
            username: username.into(),
            game_address: game_address.into(),
            world: world.into(),
        }
    }

    /// Returns the name of the first empty field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("mod_version", &self.mod_version),
            ("username", &self.username),
            ("game_address", &self.game_address),
            ("world", &self.world),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
    }
}

impl PacketBody for Handshake {
    const PACKET_ID: u16 = 1;
    const NAME: &'static str = "Handshake";

    fn write(&self, buf: &mut BytesMut, limits: &CodecLimits) -> Result<(), ProtocolError> {
        wire::write_string(buf, &self.mod_version, limits.max_string_len)?;
        wire::write_string(buf, &self.username, limits.max_string_len)?;
        wire::write_string(buf, &self.game_address, limits.max_string_len)?;
        wire::write_string(buf, &self.world, limits.max_string_len)?;
        Ok(())
    }
}

/// Decodes a Handshake payload.
pub fn decode(buf: &mut Bytes, limits: &CodecLimits) -> Result<Packet, ProtocolError> {
    let max = limits.max_string_len;
    Ok(Packet::Handshake(Handshake {
        mod_version: wire::read_string(buf, max)?,
        username: wire::read_string(buf, max)?,
        game_address: wire::read_string(buf, max)?,
        world: wire::read_string(buf, max)?,
    }))
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Handshake{{version='{}' username='{}' gameAddress='{}' world='{}'}}",
            self.mod_version, self.username, self.game_address, self.world
        )
    }
}
