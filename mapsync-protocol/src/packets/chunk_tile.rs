//! ChunkTile (4), either direction.
//!
//! Carries one chunk's map data. The tile body is opaque to the protocol
//! layer; only its coordinates and timestamp are interpreted.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::packet::{Packet, PacketBody};
use crate::wire::{self, CodecLimits};

/// ChunkTile packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTile {
    /// World or dimension the chunk belongs to.
    pub world: String,
    pub chunk_x: i32,
    pub chunk_z: i32,
    /// When the chunk was observed, in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Encoded tile data.
    pub data: Bytes,
}

impl ChunkTile {
    pub fn new(
        world: impl Into<String>,
        chunk_x: i32,
        chunk_z: i32,
        timestamp: u64,
        data: Bytes,
    ) -> Self {
        Self {
            world: world.into(),
            chunk_x,
            chunk_z,
            timestamp,
            data,
        }
    }
}

impl PacketBody for ChunkTile {
    const PACKET_ID: u16 = 4;
    const NAME: &'static str = "ChunkTile";

    fn write(&self, buf: &mut BytesMut, limits: &CodecLimits) -> Result<(), ProtocolError> {
        wire::write_string(buf, &self.world, limits.max_string_len)?;
        buf.put_i32(self.chunk_x);
        buf.put_i32(self.chunk_z);
        buf.put_u64(self.timestamp);
        wire::write_blob(buf, &self.data)
    }
}

/// Decodes a ChunkTile payload.
pub fn decode(buf: &mut Bytes, limits: &CodecLimits) -> Result<Packet, ProtocolError> {
    Ok(Packet::ChunkTile(ChunkTile {
        world: wire::read_string(buf, limits.max_string_len)?,
        chunk_x: wire::read_i32(buf)?,
        chunk_z: wire::read_i32(buf)?,
        timestamp: wire::read_u64(buf)?,
        data: wire::read_blob(buf)?,
    }))
}
