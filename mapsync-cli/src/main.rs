//! mapsync-cli - Command-line interface for mapsync
//!
//! Connects to a mapsync server as a player would, for testing servers by hand.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use mapsync_client::{Client, ConnectionConfig};
use mapsync_protocol::MOD_VERSION;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mapsync-cli")]
#[command(about = "Command-line interface for the mapsync server")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, env = "MAPSYNC_SERVER", default_value = "127.0.0.1:12312")]
    server: SocketAddr,

    /// Player name sent in the handshake
    #[arg(short, long, env = "MAPSYNC_USERNAME", default_value = "mapsync-cli")]
    username: String,

    /// Game server the player is on; tiles are shared per game server
    #[arg(short, long, env = "MAPSYNC_GAME_ADDRESS", default_value = "localhost:25565")]
    game_address: String,

    /// World or dimension the player is in
    #[arg(short, long, default_value = "overworld")]
    world: String,

    /// Mod version to announce (defaults to this build's version)
    #[arg(long, default_value = MOD_VERSION)]
    mod_version: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, handshake and report the session
    Handshake,

    /// Upload one tile read from a file
    SendTile {
        /// Chunk X coordinate
        #[arg(short, long, allow_hyphen_values = true)]
        x: i32,

        /// Chunk Z coordinate
        #[arg(short, long, allow_hyphen_values = true)]
        z: i32,

        /// File holding the encoded tile data
        #[arg(short, long)]
        file: PathBuf,

        /// World override for this tile
        #[arg(long)]
        world: Option<String>,
    },

    /// Print tiles relayed by the server until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Read the tile before connecting so a bad path fails fast
    let tile_data = match &cli.command {
        Commands::SendTile { file, .. } => match commands::read_tile(file) {
            Ok(data) => Some(data),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
        _ => None,
    };

    let config = ConnectionConfig::new(cli.server)
        .with_identity(&cli.username, &cli.game_address, &cli.world)
        .with_mod_version(&cli.mod_version);
    let client = Client::new(config);

    let welcome = client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    match cli.command {
        Commands::Handshake => {
            println!("{}", commands::format_welcome(&cli.server, &welcome));
        }
        Commands::SendTile { x, z, world, .. } => {
            let data = tile_data.unwrap_or_default();
            let world = world.unwrap_or_else(|| cli.world.clone());
            match commands::send_tile(&client, &world, x, z, data).await {
                Ok(output) => println!("{}", output),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Watch => {
            // Subscribe to tiles BEFORE starting read loop
            let mut tiles = client.subscribe_tiles();
            let mut reader = client.spawn_read_loop();

            eprintln!(
                "{} {} as {} (session {})",
                "Watching".green(),
                cli.game_address.cyan(),
                cli.username,
                welcome.session_id
            );
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            loop {
                tokio::select! {
                    tile = tiles.recv() => {
                        match tile {
                            Ok(tile) => println!("{}", commands::format_tile(&tile)),
                            Err(RecvError::Lagged(n)) => {
                                eprintln!("{}: lagged {} tiles", "Warning".yellow(), n);
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    result = &mut reader => {
                        match result {
                            Ok(Ok(goodbye)) => eprintln!("{}", commands::format_disconnect(&goodbye)),
                            Ok(Err(e)) => eprintln!("{}: {}", "Connection closed".red(), e),
                            Err(e) => eprintln!("{}: {}", "Error".red(), e),
                        }
                        return Ok(());
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n{}", "Stopping watch...".dimmed());
                        break;
                    }
                }
            }
        }
    }

    client.close().await?;
    Ok(())
}
