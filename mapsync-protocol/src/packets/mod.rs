//! Packet definitions for mapsync.

pub mod chunk_tile;
pub mod disconnect;
pub mod handshake;
pub mod welcome;

pub use chunk_tile::ChunkTile;
pub use disconnect::{Disconnect, DisconnectReason};
pub use handshake::Handshake;
pub use welcome::Welcome;
