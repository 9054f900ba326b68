// Copyright (c) 2024 Botho Foundation

use anyhow::{Context, Result};
use rp_gateway::Gateway;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::open_store;
use crate::config::Config;
use crate::feed::GatewayFeed;
use crate::registry::NodeRegistry;

/// How often the peer table is reported while running
const STATUS_INTERVAL_SECS: u64 = 60;

/// Run the gateway and host the configured users
pub fn run(config_path: &Path, port: Option<u16>) -> Result<()> {
    let mut config =
        Config::load(config_path).context("No config found. Run 'republic init' first.")?;
    if let Some(port) = port {
        config.network.listen_port = port;
    }

    println!("Republic gateway starting. Press Ctrl+C to stop.");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async { run_async(config, config_path).await })
}

async fn run_async(config: Config, config_path: &Path) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })?;

    let store = open_store(&config, config_path)?;
    let feed = Arc::new(GatewayFeed::new());
    let registry = Arc::new(NodeRegistry::new(store, feed.clone(), config.runner()));

    for user in config.hosted_users() {
        let node = registry
            .get_or_spawn(&user)
            .await
            .with_context(|| format!("Failed to start node for {}", user))?;
        info!(user = %node.user_id(), public_key = %node.public_key(), "Hosting node");
    }

    let gateway = Gateway::new(config.network.clone(), registry.clone());
    feed.attach(gateway.clone());

    let listen_addr = SocketAddr::from(([0, 0, 0, 0], config.network.listen_port));
    let bound = gateway
        .listen(listen_addr)
        .await
        .with_context(|| format!("Failed to listen on {}", listen_addr))?;
    println!("Listening on {}", bound);

    let connected = gateway.connect_bootstrap().await;
    if connected == 0 && !config.network.bootstrap_peers.is_empty() {
        warn!("Could not reach any bootstrap peer");
    } else if config.network.bootstrap_peers.is_empty() {
        warn!("No bootstrap peers configured. Add bootstrap_peers to config.toml");
    }

    let mut ticks = 0u64;
    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;
        ticks += 1;
        if ticks % (STATUS_INTERVAL_SECS * 4) == 0 {
            let peers = gateway.peers();
            info!(
                peers = peers.len(),
                directory = gateway.directory().len(),
                users = registry.active_users().len(),
                "Gateway status"
            );
        }
    }

    println!("\nShutting down...");
    gateway.shutdown();
    registry.shutdown_all();
    Ok(())
}
