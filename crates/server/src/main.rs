//! Replica - replication server
//!
//! Loads settings, listens for clients and runs the simulation tick.

use anyhow::Context;
use replica_config::Settings;
use replica_network::{GameServer, HostEvent, ServerEvent, ServerOptions, TcpHost};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_SETTINGS_PATH: &str = "config/server.cfg";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Replica server starting up");

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string());
    let settings = match Settings::load_from_file(&path) {
        Ok(settings) => {
            info!("Configuration loaded from {}", path);
            settings
        }
        Err(e) => {
            warn!("Failed to load {}: {}", path, e);
            warn!("Using default configuration");
            Settings::default()
        }
    };
    settings.display();

    let address = settings.bind_address().context("invalid listen address")?;
    let (host, mut events) = TcpHost::bind(address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    let mut server = GameServer::new(ServerOptions::from(&settings), host.transport());
    let accept = host.spawn();

    let mut ticker = tokio::time::interval(Duration::from_millis(settings.tick_rate_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("Server is ready on {}", address);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(HostEvent::Connected(peer, addr)) => {
                    info!("Client {} connected from {}", peer, addr);
                    server.on_connected(peer);
                }
                Some(HostEvent::Received(peer, bytes)) => server.receive(peer, bytes),
                Some(HostEvent::Disconnected(peer)) => server.on_disconnected(peer),
                None => {
                    error!("Host stopped");
                    break;
                }
            },

            _ = ticker.tick() => {
                if let Err(e) = server.update() {
                    error!("Tick {} failed: {}", server.tick(), e);
                }
                for event in server.drain_events() {
                    log_event(&event);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    let peers: Vec<_> = server.peers().collect();
    for peer in peers {
        if let Err(e) = server.kick(peer, "Server shutting down") {
            warn!("Failed to disconnect {}: {}", peer, e);
        }
    }
    accept.abort();

    // Let connection tasks flush their disconnects
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("Server stopped");
    Ok(())
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::ClientConnected(peer) => info!("Client {} authenticating", peer),
        ServerEvent::ClientActive(peer) => info!("Client {} active", peer),
        ServerEvent::ClientDisconnected { peer, reason } => info!("Client {} left: {}", peer, reason),
        ServerEvent::ClientDropped { peer, reason } => warn!("Client {} dropped: {}", peer, reason),
        ServerEvent::RemoteCall { peer, name } => info!("Client {} called {}", peer, name),
    }
}
