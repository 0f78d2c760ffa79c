//! Per-connection session bookkeeping.

use mapsync_protocol::Session;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, waiting for the Handshake packet.
    AwaitingHandshake,
    /// Handshake accepted; packets flow both ways.
    Ready,
    /// Session is closing.
    Closing,
}

/// A connected client.
pub struct ClientSession {
    /// Unique session ID, also sent to the client in Welcome.
    pub id: String,

    /// Remote address.
    pub remote_addr: SocketAddr,

    /// Session state.
    state: SessionState,

    /// Identity from the handshake.
    identity: Option<Session>,

    /// Packets received after the handshake.
    packets_received: AtomicU64,

    /// Tiles this session published to the relay.
    tiles_sent: AtomicU64,

    /// Tiles forwarded to this session from other peers.
    tiles_forwarded: AtomicU64,

    /// Session creation time.
    created_at: Instant,

    /// Last time the peer sent anything.
    last_activity: Mutex<Instant>,
}

impl ClientSession {
    /// Creates a new session.
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            remote_addr,
            state: SessionState::AwaitingHandshake,
            identity: None,
            packets_received: AtomicU64::new(0),
            tiles_sent: AtomicU64::new(0),
            tiles_forwarded: AtomicU64::new(0),
            created_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Returns the session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sets the session state.
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Completes the handshake.
    pub fn complete_handshake(&mut self, identity: Session) {
        self.identity = Some(identity);
        self.state = SessionState::Ready;
    }

    /// Returns the handshake identity.
    pub fn identity(&self) -> Option<&Session> {
        self.identity.as_ref()
    }

    pub fn username(&self) -> Option<&str> {
        self.identity.as_ref().map(|s| s.username.as_str())
    }

    /// Returns the game server this client is playing on.
    pub fn game_address(&self) -> Option<&str> {
        self.identity.as_ref().map(|s| s.game_address.as_str())
    }

    /// Records inbound bytes from the peer.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Records a packet received after the handshake.
    pub fn record_packet(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn record_tile_sent(&self) {
        self.tiles_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tiles_sent(&self) -> u64 {
        self.tiles_sent.load(Ordering::Relaxed)
    }

    pub fn record_tile_forwarded(&self) {
        self.tiles_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tiles_forwarded(&self) -> u64 {
        self.tiles_forwarded.load(Ordering::Relaxed)
    }

    /// Returns the instant of the last inbound activity.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Returns the time since last activity.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Returns the session age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state)
            .field("username", &self.username())
            .finish()
    }
}
