//! The packet contract and the sum type over the packet catalog.

use crate::error::ProtocolError;
use crate::packets::{ChunkTile, Disconnect, Handshake, Welcome};
use crate::wire::CodecLimits;
use bytes::BytesMut;

/// Contract implemented by every concrete packet type.
///
/// A packet knows its id and how to write its own payload. Decoding is not
/// part of the contract: the id has to be read off the frame before the type
/// can be chosen, so decoders are free functions looked up in the
/// [`PacketRegistry`](crate::registry::PacketRegistry).
pub trait PacketBody {
    /// Id unique within the registry and stable across versions.
    const PACKET_ID: u16;

    /// Name used in logs and metrics.
    const NAME: &'static str;

    /// Writes the payload, without any framing.
    fn write(&self, buf: &mut BytesMut, limits: &CodecLimits) -> Result<(), ProtocolError>;
}

/// Any packet of the mapsync catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Handshake(Handshake),
    Welcome(Welcome),
    Disconnect(Disconnect),
    ChunkTile(ChunkTile),
}

impl Packet {
    /// Returns the packet id.
    pub fn id(&self) -> u16 {
        match self {
            Packet::Handshake(_) => Handshake::PACKET_ID,
            Packet::Welcome(_) => Welcome::PACKET_ID,
            Packet::Disconnect(_) => Disconnect::PACKET_ID,
            Packet::ChunkTile(_) => ChunkTile::PACKET_ID,
        }
    }

    /// Returns the packet name.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Handshake(_) => Handshake::NAME,
            Packet::Welcome(_) => Welcome::NAME,
            Packet::Disconnect(_) => Disconnect::NAME,
            Packet::ChunkTile(_) => ChunkTile::NAME,
        }
    }

    /// Writes the payload of the wrapped packet.
    pub fn write(&self, buf: &mut BytesMut, limits: &CodecLimits) -> Result<(), ProtocolError> {
        match self {
            Packet::Handshake(p) => p.write(buf, limits),
            Packet::Welcome(p) => p.write(buf, limits),
            Packet::Disconnect(p) => p.write(buf, limits),
            Packet::ChunkTile(p) => p.write(buf, limits),
        }
    }
}

impl From<Handshake> for Packet {
    fn from(p: Handshake) -> Self {
        Packet::Handshake(p)
    }
}

impl From<Welcome> for Packet {
    fn from(p: Welcome) -> Self {
        Packet::Welcome(p)
    }
}

impl From<Disconnect> for Packet {
    fn from(p: Disconnect) -> Self {
        Packet::Disconnect(p)
    }
}

impl From<ChunkTile> for Packet {
    fn from(p: ChunkTile) -> Self {
        Packet::ChunkTile(p)
    }
}
