//! CLI command implementations.
//!
//! These modules implement the user-facing CLI commands and legitimately
//! use stdout for output.

#![allow(clippy::print_stdout)]

pub mod delete;
pub mod init;
pub mod mint;
pub mod run;
pub mod send;
pub mod status;
pub mod trust;

use anyhow::{anyhow, Context, Result};
use rp_chain::Block;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::config::{store_path_from_config, Config, StorageBackend};
use crate::feed::{BlockFeed, DirectFeed};
use crate::node::{Node, NodeError};
use crate::registry::NodeRegistry;
use crate::storage::{DocumentStore, LmdbStore, MemoryStore};

/// Open the configured document store.
pub fn open_store(config: &Config, config_path: &Path) -> Result<Arc<dyn DocumentStore>> {
    match config.storage.backend {
        StorageBackend::Lmdb => {
            let path = store_path_from_config(config_path);
            let store = LmdbStore::open(&path)
                .map_err(|e| anyhow!("Failed to open store at {}: {}", path.display(), e))?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; nothing will be saved");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// A short-lived node host for one-shot commands.
///
/// Blocks addressed to other users are pushed straight to the bootstrap
/// peers. Do not point a one-shot command at the data directory of a running
/// `republic run`.
pub struct Session {
    pub config: Config,
    pub registry: NodeRegistry,
}

impl Session {
    pub fn open(config_path: &Path) -> Result<Self> {
        let config = Config::load(config_path)
            .context("No config found. Run 'republic init' first.")?;
        let store = open_store(&config, config_path)?;
        let feed: Arc<dyn BlockFeed> = Arc::new(DirectFeed::new(config.network.clone()));
        let registry = NodeRegistry::new(store, feed, config.runner());
        Ok(Self { config, registry })
    }

    /// The node for `user`, or for the configured default user.
    pub async fn node(&self, user: Option<&str>) -> Result<Arc<Node>> {
        let user = user.unwrap_or(&self.config.node.default_user);
        self.registry
            .get_or_spawn(user)
            .await
            .with_context(|| format!("Failed to load node for {}", user))
    }

    pub fn close(&self) {
        self.registry.shutdown_all();
    }
}

/// Turn a "created but not saved" result into success by retrying the save.
pub async fn settle(node: &Node, result: Result<Block, NodeError>) -> Result<Block> {
    match result {
        Err(NodeError::NotPersisted { block, source }) => {
            warn!(index = block.index, error = %source, "Save failed, retrying");
            node.save_chain()
                .await
                .context("Block was created but could not be saved")?;
            Ok(*block)
        }
        other => Ok(other?),
    }
}
