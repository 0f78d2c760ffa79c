//! # mapsync-protocol
//!
//! Wire protocol implementation for mapsync, the map synchronization
//! protocol spoken between the game mod and its companion server.
//!
//! This crate provides:
//! - Big-endian wire primitives and length-prefixed strings
//! - The packet contract, the packet catalog and the process-wide registry
//! - Length-prefixed framing with partial-read reassembly
//! - The handshake state machine that gates every connection
//! - A per-connection driver tying the pieces together, free of any I/O

pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod packet;
pub mod packets;
pub mod registry;
pub mod wire;

pub use codec::{Decoder, Encoder};
pub use connection::{ConnectionError, ConnectionEvent, ServerConnection, UnknownPacketPolicy};
pub use error::ProtocolError;
pub use frame::{Frame, FRAME_HEADER_SIZE};
pub use handshake::{
    HandshakeMachine, HandshakeState, RejectReason, Session, VersionMatching, VersionPolicy,
};
pub use packet::{Packet, PacketBody};
pub use packets::{ChunkTile, Disconnect, DisconnectReason, Handshake, Welcome};
pub use registry::{DecodeFn, PacketRegistry, RegistryBuilder};
pub use wire::CodecLimits;

/// Mod version spoken by this build.
pub const MOD_VERSION: &str = "1.4.0";

/// Default port for the mapsync server.
pub const DEFAULT_PORT: u16 = 12312;

/// Default maximum frame length (2 MiB), counting packet id and payload.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 2 * 1024 * 1024;

/// Hard ceiling for configurable frame sizes (64 MiB).
pub const MAX_FRAME_SIZE_CEILING: u32 = 64 * 1024 * 1024;

/// Default maximum length of a single string field, in bytes.
pub const DEFAULT_MAX_STRING_LEN: u16 = 1024;
