// Copyright (c) 2024 Botho Foundation

//! Cache of live nodes, keyed by normalized user id.

use async_trait::async_trait;
use parking_lot::RwLock;
use rp_chain::{normalize_user_id, Block, ContractRunner, TransferRequest};
use rp_gateway::{GatewayError, GatewayResult, LocalHost};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::feed::BlockFeed;
use crate::node::{Node, NodeError};
use crate::storage::{DocumentStore, CHAINS, KEYS, TRUST};

/// Owns every node hosted by this process.
pub struct NodeRegistry {
    store: Arc<dyn DocumentStore>,
    feed: Arc<dyn BlockFeed>,
    runner: ContractRunner,
    nodes: RwLock<HashMap<String, Arc<Node>>>,
    spawn_lock: Mutex<()>,
}

impl NodeRegistry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        feed: Arc<dyn BlockFeed>,
        runner: ContractRunner,
    ) -> Self {
        Self {
            store,
            feed,
            runner,
            nodes: RwLock::new(HashMap::new()),
            spawn_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<Node>> {
        self.nodes.read().get(&normalize_user_id(user_id)).cloned()
    }

    /// The node for `user_id`, initializing it on first use.
    pub async fn get_or_spawn(&self, user_id: &str) -> Result<Arc<Node>, NodeError> {
        let user_id = normalize_user_id(user_id);
        if let Some(node) = self.get(&user_id) {
            return Ok(node);
        }

        let _guard = self.spawn_lock.lock().await;
        if let Some(node) = self.get(&user_id) {
            return Ok(node);
        }
        let node = Node::initialize(
            &user_id,
            self.store.clone(),
            self.feed.clone(),
            self.runner.clone(),
        )
        .await?;
        self.nodes.write().insert(user_id, node.clone());
        Ok(node)
    }

    /// Drop the cached node for `user_id`.
    pub fn evict(&self, user_id: &str) -> Option<Arc<Node>> {
        let node = self.nodes.write().remove(&normalize_user_id(user_id));
        if let Some(node) = &node {
            node.shutdown();
            debug!(user = %node.user_id(), "node evicted");
        }
        node
    }

    /// Erase everything stored for `user_id`. Irreversible.
    pub async fn delete_account(&self, user_id: &str) -> Result<(), NodeError> {
        let user_id = normalize_user_id(user_id);
        let _guard = self.spawn_lock.lock().await;
        self.evict(&user_id);
        for collection in [CHAINS, KEYS, TRUST] {
            self.store.delete(collection, &user_id).await?;
        }
        info!(user = %user_id, "account deleted");
        Ok(())
    }

    pub fn active_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.nodes.read().keys().cloned().collect();
        users.sort();
        users
    }

    pub fn shutdown_all(&self) {
        for (_, node) in self.nodes.write().drain() {
            node.shutdown();
        }
    }
}

/// Business rejections end at the node; everything else is reported back to
/// the gateway.
fn host_result<T>(user_id: &str, result: Result<T, NodeError>) -> GatewayResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_rejection() => {
            debug!(user = %user_id, error = %e, "peer message rejected");
            Ok(())
        }
        Err(e) => {
            warn!(user = %user_id, error = %e, "failed to handle peer message");
            Err(GatewayError::Host(e.to_string()))
        }
    }
}

#[async_trait]
impl LocalHost for NodeRegistry {
    fn hosts(&self, user_id: &str) -> bool {
        self.nodes.read().contains_key(&normalize_user_id(user_id))
    }

    fn hosted_users(&self) -> Vec<String> {
        self.active_users()
    }

    async fn on_new_block(
        &self,
        user_id: &str,
        block: Block,
        origin_key: Option<String>,
    ) -> GatewayResult<()> {
        let Some(node) = self.get(user_id) else {
            return Err(GatewayError::Unroutable(user_id.to_string()));
        };
        host_result(user_id, node.handle_incoming_block(block, origin_key).await)
    }

    async fn on_transfer_request(
        &self,
        user_id: &str,
        request: TransferRequest,
    ) -> GatewayResult<()> {
        let Some(node) = self.get(user_id) else {
            return Err(GatewayError::Unroutable(user_id.to_string()));
        };
        let result = node.handle_transfer_request(&request).await;
        if let Ok(receipt) = &result {
            info!(user = %user_id, from = %request.from, tx = %receipt.tx_id, "transfer request applied");
        }
        host_result(user_id, result)
    }

    async fn chain_of(&self, user_id: &str) -> Option<Vec<Block>> {
        match self.get(user_id) {
            Some(node) => Some(node.blocks().await),
            None => None,
        }
    }

    async fn on_chain_response(
        &self,
        requester: &str,
        node_id: &str,
        chain: Vec<Block>,
    ) -> GatewayResult<()> {
        let Some(node) = self.get(requester) else {
            return Err(GatewayError::Unroutable(requester.to_string()));
        };
        node.update_external_chain(node_id, chain);
        Ok(())
    }
}
