//! # mapsync-client
//!
//! Client library for mapsync.
//!
//! This crate provides:
//! - Async TCP client with connection management
//! - The Handshake / Welcome exchange
//! - Tile upload and a broadcast feed of tiles relayed by the server

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
