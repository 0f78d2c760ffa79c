//! Tile relay between players on the same game server.
//!
//! Each game address gets its own broadcast channel. Every tile is tagged
//! with the session that published it, and a [`RelaySubscription`] drops
//! tiles carrying its own session id, so a client never gets its own tiles
//! echoed back.

use dashmap::DashMap;
use mapsync_protocol::ChunkTile;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Tile as it travels through the relay.
#[derive(Debug, Clone)]
pub struct RelayedTile {
    /// Session that published the tile.
    pub origin: Arc<str>,
    pub tile: ChunkTile,
}

/// Routes tiles between sessions sharing a game address.
pub struct TileRelay {
    /// Per-game-address broadcast channels.
    channels: DashMap<String, broadcast::Sender<RelayedTile>>,

    /// Channel capacity.
    channel_capacity: usize,
}

impl TileRelay {
    /// Creates a relay whose channels hold `channel_capacity` tiles each.
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Subscribes `session_id` to the tiles of `game_address`.
    pub fn subscribe(&self, game_address: &str, session_id: &str) -> RelaySubscription {
        // Get or create channel for this game address
        let receiver = self
            .channels
            .entry(game_address.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe();

        RelaySubscription {
            session_id: Arc::from(session_id),
            game_address: game_address.to_string(),
            receiver,
        }
    }

    /// Publishes a tile from `origin` to every subscriber of `game_address`.
    ///
    /// Returns the number of other sessions the tile was queued for.
    pub fn publish(&self, game_address: &str, origin: &str, tile: ChunkTile) -> usize {
        let Some(sender) = self.channels.get(game_address) else {
            return 0;
        };

        let relayed = RelayedTile {
            origin: Arc::from(origin),
            tile,
        };

        // Send fails only when nobody is subscribed
        match sender.send(relayed) {
            // The publisher is normally subscribed too
            Ok(receivers) => receivers.saturating_sub(1),
            Err(_) => 0,
        }
    }

    /// Drops the channel for `game_address` once nobody listens to it.
    pub fn prune(&self, game_address: &str) -> bool {
        self.channels
            .remove_if(game_address, |_, sender| sender.receiver_count() == 0)
            .is_some()
    }

    /// Returns the number of sessions subscribed to `game_address`.
    pub fn subscriber_count(&self, game_address: &str) -> usize {
        self.channels
            .get(game_address)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Returns the number of game addresses with a channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for TileRelay {
    fn default() -> Self {
        Self::new(256)
    }
}

/// One session's view of the relay.
pub struct RelaySubscription {
    session_id: Arc<str>,
    game_address: String,
    receiver: broadcast::Receiver<RelayedTile>,
}

impl RelaySubscription {
    /// Waits for the next tile published by another session.
    ///
    /// Returns `None` once the channel is gone. A subscriber that falls
    /// behind loses the oldest tiles and keeps going.
    pub async fn recv(&mut self) -> Option<ChunkTile> {
        loop {
            match self.receiver.recv().await {
                Ok(relayed) => {
                    if *relayed.origin == *self.session_id {
                        continue;
                    }
                    return Some(relayed.tile);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        "Session {} lagged {} tiles on {}",
                        self.session_id,
                        n,
                        self.game_address
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn game_address(&self) -> &str {
        &self.game_address
    }
}
