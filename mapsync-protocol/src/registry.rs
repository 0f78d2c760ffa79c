//! Packet registry: maps packet ids to their decode functions.
//!
//! The registry is assembled once with a [`RegistryBuilder`] and is immutable
//! afterwards, so any number of connections can read it concurrently without
//! locking. The catalog shipped with this crate is available through
//! [`PacketRegistry::standard`].

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::packet::{Packet, PacketBody};
use crate::packets::{self, ChunkTile, Disconnect, Handshake, Welcome};
use crate::wire::{self, CodecLimits};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Decodes a packet payload. The payload excludes the frame header.
pub type DecodeFn = fn(&mut Bytes, &CodecLimits) -> Result<Packet, ProtocolError>;

#[derive(Clone, Copy)]
struct Entry {
    name: &'static str,
    decode: DecodeFn,
}

/// Immutable id-to-decoder mapping.
pub struct PacketRegistry {
    entries: HashMap<u16, Entry>,
}

/// Builder for [`PacketRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<u16, Entry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a decoder for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already registered.
    pub fn register(mut self, id: u16, name: &'static str, decode: DecodeFn) -> Self {
        if let Some(existing) = self.entries.get(&id) {
            panic!(
                "packet id {} registered twice ({} and {})",
                id, existing.name, name
            );
        }
        self.entries.insert(id, Entry { name, decode });
        self
    }

    /// Registers a decoder under the id and name declared by `P`.
    pub fn register_packet<P: PacketBody>(self, decode: DecodeFn) -> Self {
        self.register(P::PACKET_ID, P::NAME, decode)
    }

    pub fn build(self) -> PacketRegistry {
        PacketRegistry {
            entries: self.entries,
        }
    }
}

impl PacketRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Returns the process-wide registry holding the mapsync catalog.
    pub fn standard() -> &'static PacketRegistry {
        static STANDARD: OnceLock<PacketRegistry> = OnceLock::new();
        STANDARD.get_or_init(|| {
            PacketRegistry::builder()
                .register_packet::<Handshake>(packets::handshake::decode)
                .register_packet::<Welcome>(packets::welcome::decode)
                .register_packet::<Disconnect>(packets::disconnect::decode)
                .register_packet::<ChunkTile>(packets::chunk_tile::decode)
                .build()
        })
    }

    /// Returns whether `id` has a decoder.
    pub fn contains(&self, id: u16) -> bool {
        self.entries.contains_key(&id)
    }

    /// Returns the registered name for `id`.
    pub fn name(&self, id: u16) -> Option<&'static str> {
        self.entries.get(&id).map(|e| e.name)
    }

    /// Returns the registered ids in ascending order.
    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decodes `body` as the packet registered under `id`.
    ///
    /// Fails with [`ProtocolError::UnknownPacketId`] if nothing is registered
    /// for `id`, and with [`ProtocolError::MalformedFrame`] if the decoder
    /// fails or leaves bytes unread.
    pub fn dispatch(
        &self,
        id: u16,
        body: Bytes,
        limits: &CodecLimits,
    ) -> Result<Packet, ProtocolError> {
        let entry = self
            .entries
            .get(&id)
            .ok_or(ProtocolError::UnknownPacketId(id))?;

        let mut body = body;
        let packet = (entry.decode)(&mut body, limits)?;
        wire::expect_end(&body, entry.name)?;
        Ok(packet)
    }

    /// Decodes a complete frame.
    pub fn dispatch_frame(
        &self,
        frame: &Frame,
        limits: &CodecLimits,
    ) -> Result<Packet, ProtocolError> {
        self.dispatch(frame.packet_id, frame.body.clone(), limits)
    }
}

impl std::fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<(u16, &str)> = self.entries.iter().map(|(id, e)| (*id, e.name)).collect();
        entries.sort_unstable();
        f.debug_struct("PacketRegistry")
            .field("entries", &entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode_body(packet: &Packet) -> Bytes {
        let mut buf = BytesMut::new();
        packet.write(&mut buf, &CodecLimits::default()).unwrap();
        buf.freeze()
    }

    #[test]
    fn test_standard_catalog() {
        let registry = PacketRegistry::standard();
        assert_eq!(registry.ids(), vec![1, 2, 3, 4]);
        assert_eq!(registry.name(1), Some("Handshake"));
        assert_eq!(registry.name(4), Some("ChunkTile"));
        assert!(!registry.contains(0));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_standard_is_shared() {
        let a = PacketRegistry::standard() as *const PacketRegistry;
        let b = PacketRegistry::standard() as *const PacketRegistry;
        assert_eq!(a, b);
    }

    #[test]
    fn test_dispatch_handshake() {
        let packet: Packet = Handshake::new("1.4.0", "Steve", "play.example.com:25565", "overworld").into();
        let decoded = PacketRegistry::standard()
            .dispatch(1, encode_body(&packet), &CodecLimits::default())
            .unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_dispatch_unknown_id() {
        let result = PacketRegistry::standard().dispatch(
            77,
            Bytes::from_static(b"whatever"),
            &CodecLimits::default(),
        );
        assert_eq!(result, Err(ProtocolError::UnknownPacketId(77)));
    }

    #[test]
    fn test_dispatch_malformed_body() {
        let result = PacketRegistry::standard().dispatch(
            Handshake::PACKET_ID,
            Bytes::from_static(b"\x00\x09short"),
            &CodecLimits::default(),
        );
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_dispatch_rejects_trailing_bytes() {
        let packet: Packet = Welcome::new("1.4.0", "s-1").into();
        let mut body = BytesMut::from(&encode_body(&packet)[..]);
        body.extend_from_slice(b"junk");

        let result =
            PacketRegistry::standard().dispatch(2, body.freeze(), &CodecLimits::default());
        match result {
            Err(ProtocolError::MalformedFrame(msg)) => assert!(msg.contains("Welcome")),
            other => panic!("expected MalformedFrame, got {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_is_pure() {
        let packet: Packet = Disconnect::normal().into();
        let body = encode_body(&packet);
        let registry = PacketRegistry::standard();
        let limits = CodecLimits::default();

        let first = registry.dispatch(3, body.clone(), &limits);
        let second = registry.dispatch(3, body, &limits);
        assert_eq!(first, second);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_registration_panics() {
        let _ = PacketRegistry::builder()
            .register(1, "Handshake", packets::handshake::decode)
            .register(1, "Impostor", packets::welcome::decode);
    }

    #[test]
    fn test_custom_registry() {
        let registry = PacketRegistry::builder()
            .register_packet::<ChunkTile>(packets::chunk_tile::decode)
            .build();
        assert_eq!(registry.ids(), vec![ChunkTile::PACKET_ID]);
        assert!(matches!(
            registry.dispatch(1, Bytes::new(), &CodecLimits::default()),
            Err(ProtocolError::UnknownPacketId(1))
        ));
    }

    #[test]
    fn test_empty_registry() {
        let registry = RegistryBuilder::new().build();
        assert!(registry.is_empty());
        assert!(format!("{:?}", registry).contains("PacketRegistry"));
    }
}
