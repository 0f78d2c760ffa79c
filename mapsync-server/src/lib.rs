//! # mapsync-server
//!
//! TCP server for mapsync.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - The handshake gate and per-connection protocol driving
//! - Session management
//! - Tile relay between players on the same game server
//! - Prometheus metrics endpoint

pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError, MetricsConfig, NetworkConfig, ProtocolConfig};
pub use error::ServerError;
pub use handler::{HandlerAction, PacketHandler};
pub use metrics::{run_metrics_server, Metrics};
pub use relay::{RelaySubscription, RelayedTile, TileRelay};
pub use server::{Server, ServerConfig, ServerStats};
pub use session::{ClientSession, SessionState};
