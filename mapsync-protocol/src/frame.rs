//! Binary frame format.
//!
//! Frame layout (6 bytes header + payload):
//!
//! ```text
//! +-----------+-----------+---------------------------+
//! |  length   | packet_id | payload                   |
//! |  4 bytes  |  2 bytes  | length - 2 bytes          |
//! +-----------+-----------+---------------------------+
//! ```
//!
//! `length` counts everything after itself (packet id and payload), so the
//! smallest legal value is 2. All fields are big-endian.

use crate::error::ProtocolError;
use crate::packet::Packet;
use crate::wire::CodecLimits;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the packet id in bytes.
pub const PACKET_ID_SIZE: usize = 2;

/// Size of the fixed frame header in bytes (4 + 2 = 6).
pub const FRAME_HEADER_SIZE: usize = LENGTH_PREFIX_SIZE + PACKET_ID_SIZE;

/// A parsed frame: one packet's id and undecoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Packet id.
    pub packet_id: u16,
    /// Packet payload.
    pub body: Bytes,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(packet_id: u16, body: Bytes) -> Self {
        Self { packet_id, body }
    }

    /// Creates a frame by serializing a packet.
    pub fn from_packet(packet: &Packet, limits: &CodecLimits) -> Result<Self, ProtocolError> {
        let mut body = BytesMut::new();
        packet.write(&mut body, limits)?;
        Ok(Self::new(packet.id(), body.freeze()))
    }

    /// Value of the length prefix for this frame.
    pub fn length(&self) -> usize {
        PACKET_ID_SIZE + self.body.len()
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self, max_frame_size: u32) -> Result<BytesMut, ProtocolError> {
        let length = self.length();
        if length > max_frame_size as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: u32::try_from(length).unwrap_or(u32::MAX),
                max: max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + length);

        // Length (4 bytes)
        buf.put_u32(length as u32);

        // Packet id (2 bytes)
        buf.put_u16(self.packet_id);

        // Payload
        buf.put_slice(&self.body);

        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded and consumed,
    /// `Ok(None)` if more data is needed (nothing is consumed), or `Err` on
    /// protocol errors. The declared length is checked against
    /// `max_frame_size` as soon as the prefix is available, before waiting
    /// for the payload.
    pub fn decode(buf: &mut BytesMut, max_frame_size: u32) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek at the length without consuming
        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

        if (length as usize) < PACKET_ID_SIZE {
            return Err(ProtocolError::MalformedFrame(format!(
                "frame length {} shorter than packet id",
                length
            )));
        }

        if length > max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: max_frame_size,
            });
        }

        let total_len = LENGTH_PREFIX_SIZE + length as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        // Consume length prefix
        buf.advance(LENGTH_PREFIX_SIZE);

        let packet_id = buf.get_u16();
        let body = buf.split_to(length as usize - PACKET_ID_SIZE).freeze();

        Ok(Some(Self { packet_id, body }))
    }
}
