//! End-to-end tests over real TCP sockets.

use bytes::Bytes;
use mapsync_client::{Client, ClientError, ConnectionConfig};
use mapsync_protocol::{DisconnectReason, MOD_VERSION};
use mapsync_server::{Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn start_server() -> (SocketAddr, Arc<Server>) {
    start_server_with(|config| config).await
}

async fn start_server_with(
    configure: impl FnOnce(ServerConfig) -> ServerConfig,
) -> (SocketAddr, Arc<Server>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(Server::new(configure(ServerConfig::new(addr))));
    let running = server.clone();
    tokio::spawn(async move { running.serve(listener).await });
    (addr, server)
}

fn player(addr: SocketAddr, username: &str) -> ConnectionConfig {
    ConnectionConfig::new(addr)
        .with_identity(username, "play.example.com:25565", "overworld")
        .with_handshake_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_handshake_accepted() {
    let (addr, server) = start_server().await;
    let client = Client::new(player(addr, "Steve"));

    let welcome = client.connect().await.unwrap();
    assert_eq!(welcome.mod_version, MOD_VERSION);
    assert!(!welcome.session_id.is_empty());
    assert!(client.is_connected());

    client.close().await.unwrap();
    server.shutdown();
}

#[tokio::test]
async fn test_version_mismatch_rejected() {
    let (addr, server) = start_server().await;
    let client = Client::new(player(addr, "Steve").with_mod_version("0.9.0"));

    match client.connect().await {
        Err(ClientError::Rejected { reason, message }) => {
            assert_eq!(reason, DisconnectReason::VersionMismatch);
            assert!(message.contains(MOD_VERSION), "message: {message}");
        }
        other => panic!("expected rejection, got {:?}", other.map(|w| w.session_id)),
    }
    assert!(!client.is_connected());
    server.shutdown();
}

#[tokio::test]
async fn test_empty_username_rejected() {
    let (addr, server) = start_server().await;
    let client = Client::new(player(addr, ""));

    match client.connect().await {
        Err(ClientError::Rejected { reason, .. }) => {
            assert_eq!(reason, DisconnectReason::MalformedHandshake);
        }
        other => panic!("expected rejection, got {:?}", other.map(|w| w.session_id)),
    }
    server.shutdown();
}

#[tokio::test]
async fn test_tile_relayed_between_players() {
    let (addr, server) = start_server().await;

    let alex = Client::new(player(addr, "Alex"));
    alex.connect().await.unwrap();
    let mut feed = alex.subscribe_tiles();
    let reader = alex.spawn_read_loop();

    let steve = Client::new(player(addr, "Steve"));
    steve.connect().await.unwrap();
    steve
        .send_tile(3, -7, 1_700_000_000_000, Bytes::from_static(b"tile-data"))
        .await
        .unwrap();

    let tile = tokio::time::timeout(Duration::from_secs(5), feed.recv())
        .await
        .expect("tile not relayed in time")
        .unwrap();
    assert_eq!(tile.world, "overworld");
    assert_eq!((tile.chunk_x, tile.chunk_z), (3, -7));
    assert_eq!(tile.data, Bytes::from_static(b"tile-data"));

    // Shutdown reaches connected clients as a Disconnect
    server.shutdown();
    let goodbye = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("read loop did not finish")
        .unwrap()
        .unwrap();
    assert_eq!(goodbye.reason, DisconnectReason::ServerShutdown);
}

#[tokio::test]
async fn test_connection_cap_gets_server_full() {
    let (addr, server) = start_server_with(|config| config.with_max_connections(1)).await;

    let first = Client::new(player(addr, "Steve"));
    first.connect().await.unwrap();

    let second = Client::new(player(addr, "Alex"));
    match second.connect().await {
        Err(err @ ClientError::Rejected { .. }) => {
            assert!(err.is_retryable());
            assert!(matches!(
                err,
                ClientError::Rejected {
                    reason: DisconnectReason::ServerFull,
                    ..
                }
            ));
        }
        other => panic!("expected rejection, got {:?}", other.map(|w| w.session_id)),
    }

    first.close().await.unwrap();
    server.shutdown();
}
