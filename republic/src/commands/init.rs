use anyhow::{bail, Result};
use std::path::Path;
use tracing::info;

use crate::config::{Config, StorageBackend};

/// Run the init command
pub fn run(
    config_path: &Path,
    user: Option<&str>,
    port: Option<u16>,
    peers: &[String],
    memory: bool,
) -> Result<()> {
    if Config::exists(config_path) {
        bail!(
            "Config already exists at {}\nUse a different --config path or delete the existing config.",
            config_path.display()
        );
    }

    let mut config = Config::default();
    if let Some(user) = user {
        config.node.default_user = rp_chain::normalize_user_id(user);
    }
    if let Some(port) = port {
        config.network.listen_port = port;
    }
    config.network.node_id = config.node.default_user.clone();
    config.network.bootstrap_peers = peers.to_vec();
    if memory {
        config.storage.backend = StorageBackend::Memory;
    }
    config.save(config_path)?;

    info!("Node initialized at {}", config_path.display());
    println!("\nConfig saved to: {}", config_path.display());
    println!("Default user: {}", config.node.default_user);
    println!("\nNext steps:");
    println!("  1. Run 'republic mint <amount>' to issue your asset");
    println!("  2. Run 'republic run' to join the network");

    Ok(())
}
