//! Encoder and decoder for mapsync frames and packets.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::packet::Packet;
use crate::registry::PacketRegistry;
use crate::wire::CodecLimits;
use bytes::{Bytes, BytesMut};

/// Encodes packets into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a packet into a complete frame.
    pub fn encode_packet(packet: &Packet, limits: &CodecLimits) -> Result<BytesMut, ProtocolError> {
        let frame = Frame::from_packet(packet, limits)?;
        frame.encode(limits.max_frame_size)
    }

    /// Encodes anything convertible into a [`Packet`].
    pub fn encode<P: Into<Packet>>(packet: P, limits: &CodecLimits) -> Result<BytesMut, ProtocolError> {
        Self::encode_packet(&packet.into(), limits)
    }
}

/// Reassembles frames from a byte stream.
///
/// One decoder belongs to one connection. Bytes are appended as they arrive;
/// a frame is handed out only once it is complete, and is consumed in one
/// step.
pub struct Decoder {
    buffer: BytesMut,
    limits: CodecLimits,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_limits(CodecLimits::default())
    }

    pub fn with_limits(limits: CodecLimits) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            limits,
        }
    }

    /// Returns the limits this decoder enforces.
    pub fn limits(&self) -> &CodecLimits {
        &self.limits
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer, self.limits.max_frame_size)
    }

    /// Attempts to decode the next packet from the buffer.
    ///
    /// An unknown packet id still consumes its frame, so the caller may skip
    /// it and keep decoding.
    pub fn decode_packet(
        &mut self,
        registry: &PacketRegistry,
    ) -> Result<Option<Packet>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => registry.dispatch_frame(&frame, &self.limits).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards buffered bytes, including any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
