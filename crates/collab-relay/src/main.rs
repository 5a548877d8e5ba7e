//! collab-relay: WebSocket relay for collaborative vault sync.
//!
//! Routes CRDT updates, awareness, and vault metadata between the members
//! of a vault. The relay holds no document state; clients reconcile among
//! themselves and the relay only enforces admission and fairness.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use collab_relay::server::{RelayEvent, RelayServer};
use collab_relay::RelayConfig;

#[derive(Parser, Debug)]
#[command(name = "collab-relay")]
#[command(about = "WebSocket relay for collaborative vault sync")]
struct Args {
    /// Listen port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Shared auth token (overrides WS_AUTH_TOKEN)
    #[arg(long)]
    auth_token: Option<String>,

    /// Per-IP connection cap (overrides MAX_CONNECTIONS)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

/// Interval between background sweeps of inactive sessions and stale
/// rate-limit records.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,collab_relay=debug"
    } else {
        "info,collab_relay=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting collab-relay");

    let mut config = RelayConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(token) = args.auth_token {
        config.auth_token = Some(token);
    }
    if let Some(max) = args.max_connections {
        config.max_connections_per_ip = max;
    }

    if config.auth_token.is_none() {
        info!("No auth token configured; accepting unauthenticated clients");
    }
    if config.allowed_origins.is_empty() {
        info!("No origin allowlist configured; accepting all origins");
    } else {
        info!("Origin allowlist: {:?}", config.allowed_origins);
    }

    let listener = RelayServer::bind(config.port).await?;
    let mut server = RelayServer::new(config);

    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("Relay running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            // Accept new WebSocket connections
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        server.accept_connection(stream, addr).await;
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }

            // Handle relay events (messages are routed internally)
            Some(event) = server.poll_event() => {
                match event {
                    RelayEvent::ClientLeft { connection_id } => {
                        info!(
                            "conn-{} gone, {} client(s) remain",
                            connection_id,
                            server.connection_count()
                        );
                    }
                }
            }

            // Evict inactive sessions and stale rate-limit records
            _ = sweep.tick() => {
                server.sweep().await;
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    Ok(())
}
