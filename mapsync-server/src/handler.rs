//! Session-level packet handling.
//!
//! The protocol driver decides whether a connection may proceed; this module
//! decides what an accepted packet means for the server.

use crate::metrics::Metrics;
use crate::relay::{RelaySubscription, TileRelay};
use crate::session::{ClientSession, SessionState};
use mapsync_protocol::{Packet, RejectReason, Session, Welcome, MOD_VERSION};
use std::sync::Arc;

/// What the connection loop should do after a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    Continue,
    Close,
}

/// Packet handler shared by every connection.
pub struct PacketHandler {
    relay: Arc<TileRelay>,
    /// Version announced in Welcome.
    mod_version: String,
    /// Metrics for packet tracking.
    metrics: Option<Arc<Metrics>>,
}

impl PacketHandler {
    /// Creates a new packet handler.
    pub fn new(relay: Arc<TileRelay>) -> Self {
        Self {
            relay,
            mod_version: MOD_VERSION.to_string(),
            metrics: None,
        }
    }

    /// Sets the version announced in Welcome.
    pub fn with_mod_version(mut self, version: impl Into<String>) -> Self {
        self.mod_version = version.into();
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the tile relay.
    pub fn relay(&self) -> &Arc<TileRelay> {
        &self.relay
    }

    /// Returns a reference to the metrics, if set.
    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    /// Marks the session ready and joins it to its game server's relay.
    ///
    /// Returns the Welcome reply and the session's tile feed.
    pub fn on_handshake_complete(
        &self,
        session: &mut ClientSession,
        identity: Session,
    ) -> (Welcome, RelaySubscription) {
        let subscription = self.relay.subscribe(&identity.game_address, &session.id);
        session.complete_handshake(identity);

        if let Some(ref metrics) = self.metrics {
            metrics.handshakes_total.with_label_values(&["accepted"]).inc();
            metrics.sessions_active.inc();
        }

        (Welcome::new(&self.mod_version, &session.id), subscription)
    }

    /// Records a rejected handshake.
    pub fn on_handshake_rejected(&self, reason: &RejectReason) {
        if let Some(ref metrics) = self.metrics {
            metrics
                .handshakes_total
                .with_label_values(&[reason.disconnect_reason().as_str()])
                .inc();
        }
    }

    /// Handles a packet received after the handshake.
    pub fn on_packet(&self, session: &ClientSession, packet: Packet) -> HandlerAction {
        session.record_packet();

        if let Some(ref metrics) = self.metrics {
            metrics
                .packets_received_total
                .with_label_values(&[packet.name()])
                .inc();
        }

        match packet {
            Packet::ChunkTile(tile) => {
                let Some(game_address) = session.game_address() else {
                    // Unreachable: the driver only hands out packets once Ready
                    return HandlerAction::Close;
                };
                tracing::debug!(
                    "[{}] Tile ({}, {}) in {} ({} bytes)",
                    session.remote_addr,
                    tile.chunk_x,
                    tile.chunk_z,
                    tile.world,
                    tile.data.len()
                );
                session.record_tile_sent();
                let delivered = self.relay.publish(game_address, &session.id, tile);
                if let Some(ref metrics) = self.metrics {
                    metrics.tiles_relayed_total.inc_by(delivered as f64);
                }
                HandlerAction::Continue
            }
            Packet::Disconnect(disconnect) => {
                tracing::info!(
                    "[{}] Client disconnected ({}): {}",
                    session.remote_addr,
                    disconnect.reason,
                    disconnect.message
                );
                HandlerAction::Close
            }
            other => {
                tracing::warn!(
                    "[{}] Ignoring unexpected {} from client",
                    session.remote_addr,
                    other.name()
                );
                HandlerAction::Continue
            }
        }
    }

    /// Records a frame skipped for an unknown packet id.
    pub fn on_skipped(&self, session: &ClientSession, packet_id: u16) {
        tracing::debug!(
            "[{}] Skipped unknown packet id {}",
            session.remote_addr,
            packet_id
        );
        if let Some(ref metrics) = self.metrics {
            metrics.packets_skipped_total.inc();
        }
    }

    /// Releases whatever the session held. Call exactly once per connection.
    pub fn on_close(&self, session: &mut ClientSession) {
        if session.is_ready() {
            if let Some(ref metrics) = self.metrics {
                metrics.sessions_active.dec();
            }
        }
        session.set_state(SessionState::Closing);
    }

    /// Drops the relay channel of `game_address` if nobody is left on it.
    pub fn prune_relay(&self, game_address: &str) {
        if self.relay.prune(game_address) {
            tracing::debug!("Closed relay channel for {}", game_address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mapsync_protocol::{ChunkTile, Disconnect};
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn identity(username: &str) -> Session {
        Session {
            mod_version: "1.4.0".to_string(),
            username: username.to_string(),
            game_address: "play.example.com:25565".to_string(),
            world: "overworld".to_string(),
        }
    }

    fn tile() -> ChunkTile {
        ChunkTile::new("overworld", 1, 2, 3, Bytes::from_static(b"tile"))
    }

    fn handler_with_metrics() -> (PacketHandler, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let handler =
            PacketHandler::new(Arc::new(TileRelay::new(16))).with_metrics(metrics.clone());
        (handler, metrics)
    }

    #[test]
    fn test_handshake_complete() {
        let (handler, metrics) = handler_with_metrics();
        let mut session = ClientSession::new(addr());

        let (welcome, subscription) = handler.on_handshake_complete(&mut session, identity("Steve"));

        assert!(session.is_ready());
        assert_eq!(welcome.session_id, session.id);
        assert_eq!(welcome.mod_version, MOD_VERSION);
        assert_eq!(subscription.game_address(), "play.example.com:25565");
        assert_eq!(metrics.sessions_active.get(), 1.0);
        assert_eq!(
            metrics
                .handshakes_total
                .with_label_values(&["accepted"])
                .get(),
            1.0
        );
    }

    #[test]
    fn test_custom_mod_version() {
        let handler = PacketHandler::new(Arc::new(TileRelay::default())).with_mod_version("2.0.0");
        let mut session = ClientSession::new(addr());
        let (welcome, _) = handler.on_handshake_complete(&mut session, identity("Steve"));
        assert_eq!(welcome.mod_version, "2.0.0");
    }

    #[test]
    fn test_rejection_recorded() {
        let (handler, metrics) = handler_with_metrics();
        handler.on_handshake_rejected(&RejectReason::VersionMismatch {
            expected: "1.4.0".to_string(),
            actual: "1.3.0".to_string(),
        });
        assert_eq!(
            metrics
                .handshakes_total
                .with_label_values(&["version_mismatch"])
                .get(),
            1.0
        );
    }

    #[tokio::test]
    async fn test_tile_relayed_to_peer() {
        let (handler, metrics) = handler_with_metrics();
        let mut alex = ClientSession::new(addr());
        let mut steve = ClientSession::new(addr());
        let (_, _alex_feed) = handler.on_handshake_complete(&mut alex, identity("Alex"));
        let (_, mut steve_feed) = handler.on_handshake_complete(&mut steve, identity("Steve"));

        let action = handler.on_packet(&alex, Packet::ChunkTile(tile()));

        assert_eq!(action, HandlerAction::Continue);
        assert_eq!(steve_feed.recv().await, Some(tile()));
        assert_eq!(alex.tiles_sent(), 1);
        assert_eq!(alex.packets_received(), 1);
        assert_eq!(metrics.tiles_relayed_total.get(), 1.0);
    }

    #[test]
    fn test_disconnect_closes() {
        let handler = PacketHandler::new(Arc::new(TileRelay::default()));
        let mut session = ClientSession::new(addr());
        handler.on_handshake_complete(&mut session, identity("Steve"));

        let action = handler.on_packet(&session, Packet::Disconnect(Disconnect::normal()));
        assert_eq!(action, HandlerAction::Close);
    }

    #[test]
    fn test_welcome_from_client_ignored() {
        let handler = PacketHandler::new(Arc::new(TileRelay::default()));
        let mut session = ClientSession::new(addr());
        handler.on_handshake_complete(&mut session, identity("Steve"));

        let action = handler.on_packet(&session, Packet::Welcome(Welcome::new("1.4.0", "x")));
        assert_eq!(action, HandlerAction::Continue);
    }

    #[test]
    fn test_close_releases_session() {
        let (handler, metrics) = handler_with_metrics();
        let mut session = ClientSession::new(addr());
        let (_, feed) = handler.on_handshake_complete(&mut session, identity("Steve"));

        handler.on_skipped(&session, 99);
        assert_eq!(metrics.packets_skipped_total.get(), 1.0);

        handler.on_close(&mut session);
        assert_eq!(session.state(), SessionState::Closing);
        assert_eq!(metrics.sessions_active.get(), 0.0);

        drop(feed);
        handler.prune_relay("play.example.com:25565");
        assert_eq!(handler.relay().channel_count(), 0);
    }
}
