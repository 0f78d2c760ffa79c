//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use bytes::Bytes;
use mapsync_protocol::{ChunkTile, Disconnect, Welcome};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// High-level client for mapsync.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Connects to the server and performs the handshake.
    pub async fn connect(&self) -> Result<Welcome, ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Starts the background read loop.
    pub fn spawn_read_loop(&self) -> JoinHandle<Result<Disconnect, ClientError>> {
        let conn = self.conn.clone();
        tokio::spawn(async move { conn.read_loop().await })
    }

    /// Subscribes to tiles relayed from other players.
    pub fn subscribe_tiles(&self) -> broadcast::Receiver<ChunkTile> {
        self.conn.subscribe_tiles()
    }

    /// Uploads one tile in the world given at handshake time.
    pub async fn send_tile(
        &self,
        chunk_x: i32,
        chunk_z: i32,
        timestamp: u64,
        data: Bytes,
    ) -> Result<(), ClientError> {
        let world = self.conn.config().world.clone();
        self.send_tile_in(world, chunk_x, chunk_z, timestamp, data)
            .await
    }

    /// Uploads one tile in an explicit world.
    pub async fn send_tile_in(
        &self,
        world: impl Into<String>,
        chunk_x: i32,
        chunk_z: i32,
        timestamp: u64,
        data: Bytes,
    ) -> Result<(), ClientError> {
        self.conn
            .send_tile(ChunkTile::new(world, chunk_x, chunk_z, timestamp, data))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let config = ConnectionConfig::new("127.0.0.1:12312".parse().unwrap());
        let client = Client::new(config);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_send_tile_requires_connection() {
        let config = ConnectionConfig::new("127.0.0.1:12312".parse().unwrap())
            .with_identity("Steve", "play.example.com:25565", "overworld");
        let client = Client::new(config);
        let result = client.send_tile(0, 0, 0, Bytes::new()).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }
}
