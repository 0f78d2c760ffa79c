//! Property-based tests for framing, dispatch and the handshake.

#![allow(clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use mapsync_protocol::{
    ChunkTile, CodecLimits, ConnectionEvent, Decoder, Encoder, Frame, Handshake, Packet,
    PacketRegistry, ServerConnection, VersionPolicy,
};
use proptest::prelude::*;

fn field() -> impl Strategy<Value = String> {
    // Non-empty, mixed ASCII and multi-byte characters, well under the string limit
    "[a-zA-Z0-9 ._:\\-é木]{1,64}"
}

fn handshake() -> impl Strategy<Value = Handshake> {
    (field(), field(), field(), field())
        .prop_map(|(v, u, a, w)| Handshake::new(v, u, a, w))
}

fn chunk_tile() -> impl Strategy<Value = ChunkTile> {
    (
        field(),
        any::<i32>(),
        any::<i32>(),
        any::<u64>(),
        prop::collection::vec(any::<u8>(), 0..2048),
    )
        .prop_map(|(world, x, z, ts, data)| ChunkTile::new(world, x, z, ts, Bytes::from(data)))
}

// Property: any valid handshake survives encode -> frame -> dispatch unchanged
proptest! {
    #[test]
    fn prop_handshake_roundtrip(hs in handshake()) {
        let limits = CodecLimits::default();
        let mut encoded = Encoder::encode(hs.clone(), &limits).unwrap();

        let frame = Frame::decode(&mut encoded, limits.max_frame_size).unwrap().unwrap();
        let packet = PacketRegistry::standard().dispatch_frame(&frame, &limits).unwrap();

        prop_assert_eq!(packet, Packet::Handshake(hs));
        prop_assert!(encoded.is_empty());
    }
}

// Property: tiles with arbitrary coordinates and payloads survive the codec
proptest! {
    #[test]
    fn prop_chunk_tile_roundtrip(tile in chunk_tile()) {
        let mut decoder = Decoder::new();
        decoder.extend(&Encoder::encode(tile.clone(), &CodecLimits::default()).unwrap());

        let packet = decoder.decode_packet(PacketRegistry::standard()).unwrap();
        prop_assert_eq!(packet, Some(Packet::ChunkTile(tile)));
    }
}

// Property: splitting a stream at any boundary yields the same frames
proptest! {
    #[test]
    fn prop_split_at_every_boundary(hs in handshake(), tile in chunk_tile(), split in any::<prop::sample::Index>()) {
        let limits = CodecLimits::default();
        let mut stream = BytesMut::new();
        stream.extend_from_slice(&Encoder::encode(hs.clone(), &limits).unwrap());
        stream.extend_from_slice(&Encoder::encode(tile.clone(), &limits).unwrap());

        let at = split.index(stream.len() + 1);
        let mut decoder = Decoder::new();
        let mut packets = Vec::new();

        for part in [&stream[..at], &stream[at..]] {
            decoder.extend(part);
            while let Some(packet) = decoder.decode_packet(PacketRegistry::standard()).unwrap() {
                packets.push(packet);
            }
        }

        prop_assert_eq!(packets, vec![Packet::Handshake(hs), Packet::ChunkTile(tile)]);
        prop_assert_eq!(decoder.buffered(), 0);
    }
}

// Property: byte-at-a-time delivery produces exactly one Ready event
proptest! {
    #[test]
    fn prop_handshake_byte_at_a_time(hs in handshake()) {
        let policy = VersionPolicy::Exact(hs.mod_version.clone());
        let mut conn = ServerConnection::new(policy, CodecLimits::default());
        let bytes = Encoder::encode(hs.clone(), &CodecLimits::default()).unwrap();

        let mut events = Vec::new();
        for byte in bytes.iter() {
            conn.feed(std::slice::from_ref(byte));
            while let Some(event) = conn.poll().unwrap() {
                events.push(event);
            }
        }

        prop_assert_eq!(events.len(), 1);
        match &events[0] {
            ConnectionEvent::Ready(session) => prop_assert_eq!(&session.username, &hs.username),
            other => prop_assert!(false, "expected Ready, got {:?}", other),
        }
    }
}

// Property: arbitrary bytes never panic and never yield an oversized frame
proptest! {
    #[test]
    fn prop_arbitrary_bytes_bounded(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let limits = CodecLimits::default().with_max_frame_size(1024);
        let mut decoder = Decoder::with_limits(limits);
        decoder.extend(&data);

        loop {
            match decoder.decode_frame() {
                Ok(Some(frame)) => {
                    prop_assert!(frame.length() <= 1024);
                    // Dispatch may fail, but must not panic
                    let _ = PacketRegistry::standard().dispatch_frame(&frame, &limits);
                }
                Ok(None) | Err(_) => break,
            }
        }
    }
}

// Property: the server connection never panics on arbitrary input
proptest! {
    #[test]
    fn prop_server_connection_arbitrary_input(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let mut conn = ServerConnection::new(
            VersionPolicy::Exact("1.4.0".to_string()),
            CodecLimits::default(),
        );
        conn.feed(&data);

        for _ in 0..64 {
            match conn.poll() {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => {
                    prop_assert!(conn.is_closed());
                    prop_assert_eq!(conn.buffered(), 0);
                    break;
                }
            }
        }
    }
}
