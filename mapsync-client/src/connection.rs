//! Connection management.

use crate::error::ClientError;
use mapsync_protocol::{
    ChunkTile, CodecLimits, Decoder, Disconnect, Encoder, Handshake, Packet, PacketRegistry,
    Welcome, MOD_VERSION,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long to wait for Welcome after sending Handshake.
    pub handshake_timeout: Duration,
    /// Mod version announced in the handshake.
    pub mod_version: String,
    /// Player name.
    pub username: String,
    /// Game server the player is connected to.
    pub game_address: String,
    /// World or dimension the player is in.
    pub world: String,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Frame and string limits.
    pub limits: CodecLimits,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            mod_version: MOD_VERSION.to_string(),
            username: String::new(),
            game_address: String::new(),
            world: String::new(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            limits: CodecLimits::default(),
        }
    }

    /// Sets who is connecting and from where.
    pub fn with_identity(
        mut self,
        username: impl Into<String>,
        game_address: impl Into<String>,
        world: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.game_address = game_address.into();
        self.world = world.into();
        self
    }

    pub fn with_mod_version(mut self, version: impl Into<String>) -> Self {
        self.mod_version = version.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_limits(mut self, limits: CodecLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Builds the Handshake packet for this configuration.
    pub fn handshake(&self) -> Handshake {
        Handshake::new(
            &self.mod_version,
            &self.username,
            &self.game_address,
            &self.world,
        )
    }
}

/// Default capacity for the tile channel.
const TILE_CHANNEL_CAPACITY: usize = 256;

/// A connection to a mapsync server.
pub struct Connection {
    config: ConnectionConfig,
    /// Write half of the stream.
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Read half of the stream.
    reader: Mutex<Option<OwnedReadHalf>>,
    /// Decoder for parsing server packets.
    decoder: Mutex<Decoder>,
    /// Welcome received during the handshake.
    welcome: Mutex<Option<Welcome>>,
    /// Is the connection established?
    connected: AtomicBool,
    /// Broadcast channel for tiles relayed by the server.
    tiles: broadcast::Sender<ChunkTile>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let (tiles, _) = broadcast::channel(TILE_CHANNEL_CAPACITY);
        let decoder = Decoder::with_limits(config.limits);
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            decoder: Mutex::new(decoder),
            welcome: Mutex::new(None),
            connected: AtomicBool::new(false),
            tiles,
        }
    }

    /// Subscribes to tiles relayed from other players.
    pub fn subscribe_tiles(&self) -> broadcast::Receiver<ChunkTile> {
        self.tiles.subscribe()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects to the server and performs the handshake.
    pub async fn connect(&self) -> Result<Welcome, ClientError> {
        tracing::debug!("Connecting to {}...", self.config.addr);

        let tcp_stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::Io(e)
        })?;

        // Tiles are small and latency matters more than batching
        tcp_stream.set_nodelay(true).ok();

        let (read_half, write_half) = tcp_stream.into_split();
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);
        self.decoder.lock().await.clear();

        tracing::debug!("Starting protocol handshake...");
        let welcome = self.handshake().await?;
        tracing::debug!("Handshake complete, session {}", welcome.session_id);

        *self.welcome.lock().await = Some(welcome.clone());

        // Mark as connected only after successful handshake
        self.connected.store(true, Ordering::SeqCst);

        Ok(welcome)
    }

    /// Sends Handshake and waits for Welcome or Disconnect.
    async fn handshake(&self) -> Result<Welcome, ClientError> {
        let encoded = Encoder::encode(self.config.handshake(), &self.config.limits)?;
        tracing::debug!("Sending Handshake ({} bytes)", encoded.len());
        self.write_raw(&encoded).await?;

        let packet = tokio::time::timeout(self.config.handshake_timeout, self.read_single_packet())
            .await
            .map_err(|_| {
                tracing::debug!("Handshake timeout");
                ClientError::Timeout
            })??;

        match packet {
            Packet::Welcome(welcome) => Ok(welcome),
            Packet::Disconnect(disconnect) => {
                tracing::debug!("Handshake rejected: {}", disconnect.message);
                self.drop_stream().await;
                Err(ClientError::Rejected {
                    reason: disconnect.reason,
                    message: disconnect.message,
                })
            }
            other => Err(ClientError::UnexpectedPacket(other.name())),
        }
    }

    /// Reads the next packet directly from the stream.
    /// Used during the handshake before read_loop is started.
    async fn read_single_packet(&self) -> Result<Packet, ClientError> {
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            if let Some(packet) = self.next_buffered_packet().await? {
                return Ok(packet);
            }

            let n = {
                let mut reader_guard = self.reader.lock().await;
                let reader = reader_guard.as_mut().ok_or(ClientError::NotConnected)?;
                reader.read(&mut buf).await?
            };

            if n == 0 {
                tracing::debug!("Connection closed (0 bytes)");
                return Err(ClientError::ConnectionClosed);
            }

            self.decoder.lock().await.extend(&buf[..n]);
        }
    }

    /// Decodes the next known packet from the buffer, skipping unknown ids.
    async fn next_buffered_packet(&self) -> Result<Option<Packet>, ClientError> {
        let mut decoder = self.decoder.lock().await;
        loop {
            match decoder.decode_packet(PacketRegistry::standard()) {
                Ok(packet) => return Ok(packet),
                Err(e) if !e.is_fatal() => {
                    tracing::debug!("Skipping packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn write_raw(&self, bytes: &[u8]) -> Result<(), ClientError> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(bytes).await?;
        Ok(())
    }

    /// Sends a packet.
    pub async fn send(&self, packet: &Packet) -> Result<(), ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }

        let encoded = Encoder::encode_packet(packet, &self.config.limits)?;
        tracing::debug!("Sending {} ({} bytes)", packet.name(), encoded.len());
        self.write_raw(&encoded).await
    }

    /// Uploads one tile.
    pub async fn send_tile(&self, tile: ChunkTile) -> Result<(), ClientError> {
        self.send(&Packet::ChunkTile(tile)).await
    }

    /// Reads server packets until the server says goodbye (call this in a background task).
    ///
    /// Relayed tiles are published to [`Connection::subscribe_tiles`]. Returns
    /// the server's Disconnect, or [`ClientError::ConnectionClosed`] on EOF.
    pub async fn read_loop(&self) -> Result<Disconnect, ClientError> {
        tracing::debug!("read_loop started");
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            while let Some(packet) = self.next_buffered_packet().await? {
                match packet {
                    Packet::ChunkTile(tile) => {
                        tracing::debug!(
                            "read_loop: tile ({}, {}) in {}",
                            tile.chunk_x,
                            tile.chunk_z,
                            tile.world
                        );
                        // Ignore send errors (no receivers)
                        let _ = self.tiles.send(tile);
                    }
                    Packet::Disconnect(disconnect) => {
                        tracing::debug!(
                            "read_loop: server disconnected ({}): {}",
                            disconnect.reason,
                            disconnect.message
                        );
                        self.connected.store(false, Ordering::SeqCst);
                        return Ok(disconnect);
                    }
                    other => {
                        tracing::warn!("read_loop: unexpected {} from server", other.name());
                    }
                }
            }

            let n = {
                let mut reader_guard = self.reader.lock().await;
                let reader = reader_guard.as_mut().ok_or(ClientError::NotConnected)?;
                reader.read(&mut buf).await?
            };

            if n == 0 {
                tracing::debug!("read_loop: connection closed");
                self.connected.store(false, Ordering::SeqCst);
                return Err(ClientError::ConnectionClosed);
            }

            self.decoder.lock().await.extend(&buf[..n]);
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns the session id assigned by the server.
    pub async fn session_id(&self) -> Option<String> {
        self.welcome
            .lock()
            .await
            .as_ref()
            .map(|w| w.session_id.clone())
    }

    async fn drop_stream(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        // read_loop may hold the reader; it sees EOF once the server closes
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }

    /// Sends Disconnect and closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");

        // Mark as disconnected first to stop any new sends
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        if was_connected {
            let goodbye = Encoder::encode(Disconnect::normal(), &self.config.limits)?;
            if let Err(e) = self.write_raw(&goodbye).await {
                tracing::debug!("Failed to send Disconnect: {}", e);
            }
        }

        self.drop_stream().await;
        *self.welcome.lock().await = None;

        tracing::debug!("Connection closed");
        Ok(())
    }
}
