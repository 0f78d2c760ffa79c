//! TCP server implementation.

use crate::config::Config;
use crate::error::ServerError;
use crate::handler::{HandlerAction, PacketHandler};
use crate::metrics::Metrics;
use crate::relay::{RelaySubscription, TileRelay};
use crate::session::ClientSession;
use mapsync_protocol::{
    ChunkTile, CodecLimits, ConnectionError, ConnectionEvent, Disconnect, DisconnectReason,
    Encoder, Packet, ServerConnection, UnknownPacketPolicy, VersionPolicy, DEFAULT_PORT,
    MOD_VERSION,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// How long a rejected peer gets to read the reply before the socket closes.
const REJECT_LINGER: Duration = Duration::from_secs(2);

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout, also applied to the handshake.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Version policy applied to every handshake.
    pub version_policy: VersionPolicy,
    /// Frame and string limits.
    pub limits: CodecLimits,
    /// Handling of unregistered packet ids.
    pub unknown_packets: UnknownPacketPolicy,
    /// Capacity of each relay channel.
    pub relay_capacity: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_connections", &self.max_connections)
            .field("version_policy", &self.version_policy)
            .field("limits", &self.limits)
            .field("unknown_packets", &self.unknown_packets)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout: Duration::from_secs(300),
            max_connections: 1000,
            version_policy: VersionPolicy::Exact(MOD_VERSION.to_string()),
            limits: CodecLimits::default(),
            unknown_packets: UnknownPacketPolicy::default(),
            relay_capacity: 256,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds the runtime configuration from a loaded [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            idle_timeout: config.network.idle_timeout(),
            max_connections: config.network.max_connections,
            version_policy: config.protocol.version_policy(),
            limits: config.protocol.codec_limits(),
            unknown_packets: config.protocol.unknown_packets,
            relay_capacity: config.network.relay_capacity,
            metrics: None,
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    pub fn with_limits(mut self, limits: CodecLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_unknown_packets(mut self, policy: UnknownPacketPolicy) -> Self {
        self.unknown_packets = policy;
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub handshakes_accepted: AtomicU64,
    pub handshakes_rejected: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for mapsync.
pub struct Server {
    config: ServerConfig,
    handler: Arc<PacketHandler>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

/// How a connection ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// Peer closed the socket.
    Eof,
    /// Peer sent Disconnect.
    PeerDisconnect,
    /// No inbound traffic for the idle timeout.
    Idle,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let relay = Arc::new(TileRelay::new(config.relay_capacity));
        let mut handler =
            PacketHandler::new(relay).with_mod_version(config.version_policy.local_version());
        if let Some(ref metrics) = config.metrics {
            handler = handler.with_metrics(metrics.clone());
        }
        Self {
            config,
            handler: Arc::new(handler),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(
            "Server listening on {} (mod version {})",
            listener.local_addr()?,
            self.config.version_policy.describe()
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(Self::reject_full(tcp_stream, addr, self.config.limits));
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            // Update metrics if enabled
                            if let Some(ref metrics) = self.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let handler = self.handler.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                tcp_stream.set_nodelay(true).ok();

                                let result = Self::handle_connection(
                                    tcp_stream,
                                    addr,
                                    handler,
                                    stats.clone(),
                                    config.clone(),
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);

                                // Update metrics if enabled
                                if let Some(ref metrics) = config.metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Handles a single connection until it closes.
    pub async fn handle_connection<S>(
        mut stream: S,
        addr: SocketAddr,
        handler: Arc<PacketHandler>,
        stats: Arc<ServerStats>,
        config: ServerConfig,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::info!("Client connected: {}", addr);

        let mut session = ClientSession::new(addr);
        let mut feed: Option<RelaySubscription> = None;

        let result = Self::drive(
            &mut stream,
            &mut session,
            &mut feed,
            &handler,
            &stats,
            &config,
            shutdown,
        )
        .await;

        let reply = match &result {
            Ok(CloseReason::Idle) => Some(Disconnect::new(
                DisconnectReason::IdleTimeout,
                "Idle timeout",
            )),
            Err(ServerError::ShuttingDown) => Some(Disconnect::new(
                DisconnectReason::ServerShutdown,
                "Server is shutting down",
            )),
            _ => None,
        };
        if let Some(reply) = reply {
            Self::send_final(&mut stream, addr, reply, &config.limits).await;
        }

        handler.on_close(&mut session);
        let game_address = session.game_address().map(str::to_string);
        drop(feed);
        if let Some(game_address) = game_address {
            handler.prune_relay(&game_address);
        }

        match result {
            Ok(reason) => {
                tracing::debug!(
                    "[{}] Connection closed ({:?}, {} packets)",
                    addr,
                    reason,
                    session.packets_received()
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Runs the read / relay / timeout loop for one connection.
    async fn drive<S>(
        stream: &mut S,
        session: &mut ClientSession,
        feed: &mut Option<RelaySubscription>,
        handler: &PacketHandler,
        stats: &ServerStats,
        config: &ServerConfig,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<CloseReason, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let addr = session.remote_addr;
        let mut conn = ServerConnection::new(config.version_policy.clone(), config.limits)
            .with_unknown_packets(config.unknown_packets);
        let mut buf = [0u8; 8192];

        loop {
            let deadline =
                tokio::time::Instant::from_std(session.last_activity() + config.idle_timeout);

            tokio::select! {
                biased;

                // Forward tiles published by other players
                Some(tile) = next_tile(feed) => {
                    Self::write_packet(stream, Packet::ChunkTile(tile), &config.limits).await?;
                    session.record_tile_forwarded();
                }

                // Handle incoming data from client
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] Connection closed by client", addr);
                            return Ok(CloseReason::Eof);
                        }
                        Ok(n) => {
                            tracing::trace!("[{}] Received {} bytes", addr, n);
                            session.touch();
                            conn.feed(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }

                // Handle idle timeout
                _ = tokio::time::sleep_until(deadline) => {
                    if session.idle_duration() >= config.idle_timeout {
                        tracing::info!("[{}] Idle timeout", addr);
                        return Ok(CloseReason::Idle);
                    }
                }

                // Handle shutdown signal
                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            }

            // Process every complete frame
            loop {
                let event = match conn.poll() {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(e) => {
                        Self::on_connection_error(stream, session, handler, stats, config, &e)
                            .await;
                        return Err(e.into());
                    }
                };

                match event {
                    ConnectionEvent::Ready(identity) => {
                        tracing::info!(
                            "[{}] Handshake from {} ({}) on {} / {}",
                            addr,
                            identity.username,
                            identity.mod_version,
                            identity.game_address,
                            identity.world
                        );
                        stats.handshakes_accepted.fetch_add(1, Ordering::Relaxed);
                        let (welcome, subscription) =
                            handler.on_handshake_complete(session, identity);
                        *feed = Some(subscription);
                        Self::write_packet(stream, welcome.into(), &config.limits).await?;
                    }
                    ConnectionEvent::Packet(packet) => {
                        if handler.on_packet(session, packet) == HandlerAction::Close {
                            return Ok(CloseReason::PeerDisconnect);
                        }
                    }
                    ConnectionEvent::Skipped { packet_id } => {
                        handler.on_skipped(session, packet_id);
                    }
                }
            }
        }
    }

    /// Logs, counts and answers a fatal connection error.
    async fn on_connection_error<S>(
        stream: &mut S,
        session: &ClientSession,
        handler: &PacketHandler,
        stats: &ServerStats,
        config: &ServerConfig,
        err: &ConnectionError,
    ) where
        S: AsyncWrite + Unpin,
    {
        let addr = session.remote_addr;
        match err {
            ConnectionError::Rejected(reason) => {
                tracing::warn!("[{}] Handshake rejected: {}", addr, reason);
                stats.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
                handler.on_handshake_rejected(reason);
            }
            other => {
                tracing::warn!("[{}] Closing connection: {}", addr, other);
            }
        }

        if let Some(reply) = err.disconnect() {
            Self::send_final(stream, addr, reply, &config.limits).await;
        }
    }

    async fn write_packet<S>(
        stream: &mut S,
        packet: Packet,
        limits: &CodecLimits,
    ) -> Result<(), ServerError>
    where
        S: AsyncWrite + Unpin,
    {
        let bytes = Encoder::encode_packet(&packet, limits)?;
        stream.write_all(&bytes).await?;
        Ok(())
    }

    /// Sends a last packet; the peer may already be gone, so failures only log.
    async fn send_final<S>(stream: &mut S, addr: SocketAddr, reply: Disconnect, limits: &CodecLimits)
    where
        S: AsyncWrite + Unpin,
    {
        tracing::debug!("[{}] Sending Disconnect ({})", addr, reply.reason);
        if let Err(e) = Self::write_packet(stream, reply.into(), limits).await {
            tracing::debug!("[{}] Failed to send Disconnect: {}", addr, e);
            return;
        }
        let _ = stream.flush().await;
    }

    /// Tells a peer over the connection cap why it is being closed.
    async fn reject_full<S>(mut stream: S, addr: SocketAddr, limits: CodecLimits)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let reply = Disconnect::new(
            DisconnectReason::ServerFull,
            "Server is full, try again later",
        );
        Self::send_final(&mut stream, addr, reply, &limits).await;
        let _ = stream.shutdown().await;

        // Closing with unread input resets the connection, so drain it first
        let mut buf = [0u8; 1024];
        let _ = tokio::time::timeout(REJECT_LINGER, async {
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        })
        .await;
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns a receiver that fires when the server shuts down.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Returns the packet handler.
    pub fn handler(&self) -> &Arc<PacketHandler> {
        &self.handler
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Waits for the next relayed tile, or forever when not subscribed yet.
async fn next_tile(feed: &mut Option<RelaySubscription>) -> Option<ChunkTile> {
    match feed {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
