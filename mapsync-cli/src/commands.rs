//! Command execution and output formatting.

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use colored::Colorize;
use mapsync_client::Client;
use mapsync_protocol::{ChunkTile, Disconnect, DisconnectReason, Welcome};
use std::net::SocketAddr;
use std::path::Path;

/// Reads tile data from disk.
pub fn read_tile(path: &Path) -> Result<Bytes, Box<dyn std::error::Error>> {
    let data = std::fs::read(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(Bytes::from(data))
}

/// Uploads one tile stamped with the current time.
pub async fn send_tile(
    client: &Client,
    world: &str,
    x: i32,
    z: i32,
    data: Bytes,
) -> Result<String, Box<dyn std::error::Error>> {
    let size = data.len() as u64;
    let timestamp = Utc::now().timestamp_millis().max(0) as u64;
    client.send_tile_in(world, x, z, timestamp, data).await?;

    Ok(format!(
        "{} tile ({}, {}) in {} ({})",
        "Sent".green(),
        x,
        z,
        world.cyan(),
        format_bytes(size)
    ))
}

pub fn format_welcome(server: &SocketAddr, welcome: &Welcome) -> String {
    format!(
        "{} to {}\n  Session: {}\n  Server version: {}",
        "Connected".green(),
        server.to_string().cyan(),
        welcome.session_id,
        welcome.mod_version.yellow()
    )
}

/// One line per relayed tile.
pub fn format_tile(tile: &ChunkTile) -> String {
    format!(
        "{} {} ({}, {}) {}",
        format_timestamp(tile.timestamp).dimmed(),
        tile.world.cyan(),
        tile.chunk_x,
        tile.chunk_z,
        format_bytes(tile.data.len() as u64)
    )
}

pub fn format_disconnect(disconnect: &Disconnect) -> String {
    let label = match disconnect.reason {
        DisconnectReason::Normal => "Disconnected".green(),
        DisconnectReason::ServerShutdown
        | DisconnectReason::IdleTimeout
        | DisconnectReason::ServerFull => "Disconnected".yellow(),
        _ => "Disconnected".red(),
    };
    if disconnect.message.is_empty() {
        format!("{} ({})", label, disconnect.reason)
    } else {
        format!("{} ({}): {}", label, disconnect.reason, disconnect.message)
    }
}

/// Formats a millisecond Unix timestamp as UTC.
fn format_timestamp(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Formats bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
