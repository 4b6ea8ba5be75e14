//! confluenced: stream-synchronization relay node.
//!
//! Usage: confluenced [host:port ...]
//!
//! Peers given on the command line replace the configured list. The first
//! peer is the alignment reference.

use std::time::Duration;

use anyhow::{Context, Result};

use confluence_core::RelayConfig;
use confluence_services::{PlayerGateway, Relay, RelayError};

mod status;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = RelayConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = RelayConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        RelayConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        config.peers = args;
    }
    let peers = config.validate().context("invalid relay configuration")?;
    tracing::info!(count = peers.len(), "peers passed to the relay");
    for (id, peer) in peers.iter().enumerate() {
        tracing::info!(id, peer = %peer, "  peer");
    }

    let gateway = PlayerGateway::bind(&config.network.bind_addr, config.network.player_port)
        .context("failed to open player listener")?;
    tracing::info!(addr = %gateway.local_addr()?, "player listener bound");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let relay = Relay::new(config, peers);

    let status_task = tokio::spawn(status::status_loop(
        relay.merge_set(),
        relay.peer_table(),
        relay.gate(),
        Duration::from_secs(10),
    ));

    let result = relay.run(gateway, shutdown_tx).await;
    status_task.abort();

    match result {
        Ok(played) => {
            tracing::info!(played, "relay stopped");
            Ok(())
        }
        Err(RelayError::Shutdown) => {
            tracing::info!("relay stopped before playout");
            Ok(())
        }
        Err(e) => Err(e).context("relay failed"),
    }
}
