// Copyright (c) 2024 Botho Foundation

//! A node owns one user's chain, keys and trust lines.
//!
//! Mutations take the chain lock, append in memory, save while still holding
//! the lock, then broadcast. Saves are awaited before success is reported;
//! a failed save surfaces as [`NodeError::NotPersisted`] with the block that
//! is already in memory. Broadcast failures are only logged.
//!
//! Reads for reporting go through a state snapshot published after every
//! append and never wait on the chain lock.
//!
//! Appends that can run contracts (CONTRACT blocks and cold-start replay)
//! execute on the blocking pool so a long contract never holds up the
//! runtime's worker threads.

mod error;
mod trust;

pub use self::error::NodeError;
pub use self::trust::TrustLines;

use parking_lot::{Mutex as SyncMutex, RwLock};
use rp_chain::block::{now_millis, Payload};
use rp_chain::{
    normalize_user_id, AccountState, Block, Chain, ContractRunner, InflationStats, KeyDocument,
    NodeKeys, Operation, Portfolio, TransferRequest,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::ops::Deref;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::feed::{BlockFeed, FeedSubscription};
use crate::storage::{
    ChainDocument, DocumentStore, StoreError, TrustDocument, CHAINS, KEYS, TRUST,
};

/// Result of [`Node::send_asset`].
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Own asset: a SEND block was appended.
    Local(Block),
    /// Another issuer's asset: a signed request to deliver to `issuer`.
    Remote {
        issuer: String,
        request: TransferRequest,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub success: bool,
    /// Hash of the CONTRACT block that moved the funds.
    pub tx_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub user_id: String,
    pub public_key: String,
    pub height: usize,
    pub valid: bool,
    pub state: AccountState,
    pub inflation: InflationStats,
    pub trust_lines: Vec<String>,
}

pub struct Node {
    user_id: String,
    keys: NodeKeys,
    public_key: String,
    chain: Arc<Mutex<Chain>>,
    state: RwLock<AccountState>,
    trust: TrustLines,
    trust_guard: Mutex<()>,
    external_chains: RwLock<HashMap<String, Vec<Block>>>,
    store: Arc<dyn DocumentStore>,
    feed: Arc<dyn BlockFeed>,
    subscription: SyncMutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Load or create the node for `user_id` and start following the feed.
    pub async fn initialize(
        user_id: &str,
        store: Arc<dyn DocumentStore>,
        feed: Arc<dyn BlockFeed>,
        runner: ContractRunner,
    ) -> Result<Arc<Self>, NodeError> {
        let user_id = normalize_user_id(user_id);
        let keys = load_keys(store.as_ref(), &user_id).await?;

        let stored: Option<ChainDocument> = load_document(store.as_ref(), CHAINS, &user_id).await?;
        let (chain, since, fresh) = match stored {
            Some(doc) if !doc.chain.is_empty() => {
                let last_updated = doc.last_updated;
                let (blocks, undecodable) = doc.into_blocks();
                for (position, reason) in &undecodable {
                    warn!(user = %user_id, position, %reason, "dropping undecodable stored block");
                }
                let owner = user_id.clone();
                let chain_keys = keys.clone();
                let (chain, errors) = tokio::task::spawn_blocking(move || {
                    Chain::from_blocks(owner, blocks, Some(chain_keys), runner)
                })
                .await
                .map_err(|e| NodeError::Worker(e.to_string()))?;
                if !errors.is_empty() || !undecodable.is_empty() {
                    warn!(
                        user = %user_id,
                        skipped = errors.len(),
                        dropped = undecodable.len(),
                        "chain loaded with replay errors"
                    );
                }
                (chain, last_updated, false)
            }
            _ => (Chain::new(&user_id, Some(keys.clone()), runner), 0, true),
        };

        let trust: Option<TrustDocument> = load_document(store.as_ref(), TRUST, &user_id).await?;

        let node = Arc::new(Self {
            public_key: keys.public_hex(),
            keys,
            state: RwLock::new(chain.state().clone()),
            chain: Arc::new(Mutex::new(chain)),
            trust: TrustLines::from_document(trust.unwrap_or_default()),
            trust_guard: Mutex::new(()),
            external_chains: RwLock::new(HashMap::new()),
            store,
            feed,
            subscription: SyncMutex::new(None),
            user_id,
        });

        let subscription = node.feed.subscribe(since);
        let handle = tokio::spawn(follow_feed(Arc::downgrade(&node), subscription));
        *node.subscription.lock() = Some(handle);

        if fresh {
            node.save_chain().await?;
        }

        let height = node.chain.lock().await.len();
        info!(user = %node.user_id, height, since, "node initialized");
        Ok(node)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn keys(&self) -> &NodeKeys {
        &self.keys
    }

    /// Snapshot of the derived state.
    pub fn state(&self) -> AccountState {
        self.state.read().clone()
    }

    pub async fn blocks(&self) -> Vec<Block> {
        self.chain.lock().await.blocks().to_vec()
    }

    pub async fn info(&self) -> NodeInfo {
        let chain = self.chain.lock().await;
        NodeInfo {
            user_id: self.user_id.clone(),
            public_key: self.public_key.clone(),
            height: chain.len(),
            valid: chain.is_valid(),
            state: chain.state().clone(),
            inflation: chain.inflation_stats(),
            trust_lines: self.trust.lines(),
        }
    }

    pub fn portfolio(&self) -> Portfolio {
        Portfolio::from_state(&self.user_id, &self.state.read())
    }

    /// Issuer-side ledger entry for `user_id`.
    pub fn balance_for_user(&self, user_id: &str) -> i64 {
        self.state.read().ledger_balance(&normalize_user_id(user_id))
    }

    pub async fn mint(&self, amount: i64) -> Result<Block, NodeError> {
        let mut chain = self.chain.lock().await;
        let block = chain.mint(amount)?;
        info!(user = %self.user_id, amount, index = block.index, "minted");
        self.commit(chain, block).await
    }

    /// Append a SEND of the native asset.
    pub async fn create_transaction(
        &self,
        amount: i64,
        to: &str,
        message: &str,
    ) -> Result<Block, NodeError> {
        if amount <= 0 {
            return Err(NodeError::InvalidRequest(format!(
                "amount must be positive, got {amount}"
            )));
        }
        let to = normalize_user_id(to);
        let mut chain = self.chain.lock().await;
        let block = chain.create_transaction(amount, &to, message)?;
        info!(user = %self.user_id, %to, amount, index = block.index, "sent");
        self.commit(chain, block).await
    }

    /// Send `amount` of `issuer`'s asset to `to`.
    ///
    /// The own asset is sent locally. For any other issuer this only builds
    /// the signed request; the issuer's node applies it.
    pub async fn send_asset(
        &self,
        issuer: &str,
        amount: i64,
        to: &str,
        message: &str,
    ) -> Result<SendOutcome, NodeError> {
        let issuer = normalize_user_id(issuer);
        if issuer == self.user_id {
            return self
                .create_transaction(amount, to, message)
                .await
                .map(SendOutcome::Local);
        }
        if amount <= 0 {
            return Err(NodeError::InvalidRequest(format!(
                "amount must be positive, got {amount}"
            )));
        }
        let request = TransferRequest::new_signed(
            &self.keys,
            &self.user_id,
            &normalize_user_id(to),
            amount,
            message,
            Some(&issuer),
        );
        debug!(user = %self.user_id, %issuer, amount, "built transfer request");
        Ok(SendOutcome::Remote { issuer, request })
    }

    pub async fn receive_transaction(
        &self,
        from: &str,
        amount: i64,
        sender_block_hash: &str,
        message: &str,
    ) -> Result<Block, NodeError> {
        if amount <= 0 {
            return Err(NodeError::InvalidRequest(format!(
                "amount must be positive, got {amount}"
            )));
        }
        let from = normalize_user_id(from);
        if !self.trust.is_trusted(&from) {
            debug!(user = %self.user_id, %from, "rejected receipt from untrusted sender");
            return Err(NodeError::Trust(from));
        }
        let mut chain = self.chain.lock().await;
        let block = chain.receive_transaction(&from, amount, sender_block_hash, message)?;
        info!(user = %self.user_id, %from, amount, index = block.index, "received");
        self.commit(chain, block).await
    }

    /// Apply a transfer of this node's asset between two holders.
    pub async fn handle_transfer_request(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferReceipt, NodeError> {
        let issuer = normalize_user_id(request.target_user());
        if issuer != self.user_id {
            return Err(NodeError::NotIssuer {
                node: self.user_id.clone(),
                issuer,
            });
        }
        if !request.verify() {
            return Err(NodeError::InvalidRequest("bad signature".to_string()));
        }
        if request.amount <= 0 {
            return Err(NodeError::InvalidRequest(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }

        let from = normalize_user_id(&request.from);
        let to = normalize_user_id(&request.to);
        let chain = self.chain.clone().lock_owned().await;
        let balance = chain.state().ledger_balance(&from);
        if request.amount > balance {
            debug!(user = %self.user_id, %from, balance, requested = request.amount, "insufficient funds");
            return Err(NodeError::InsufficientFunds {
                user: from,
                balance,
                requested: request.amount,
            });
        }

        let params = BTreeMap::from([("amount".to_string(), json!(request.amount))]);
        let code = vec![Operation::ledger_transfer(&from, &to)];
        let (chain, block) = run_blocking(chain, move |c| c.run_contract(code, params)).await?;
        info!(user = %self.user_id, %from, %to, amount = request.amount, "transfer applied");
        let block = self.commit(chain, block).await?;
        Ok(TransferReceipt {
            success: true,
            tx_id: block.hash,
        })
    }

    /// Append a CONTRACT block running `code`.
    pub async fn run_contract(
        &self,
        code: Vec<Operation>,
        params: BTreeMap<String, Value>,
    ) -> Result<Block, NodeError> {
        let chain = self.chain.clone().lock_owned().await;
        let (chain, block) = run_blocking(chain, move |c| c.run_contract(code, params)).await?;
        self.commit(chain, block).await
    }

    /// React to a block seen on the feed or from a peer.
    ///
    /// A trusted SEND addressed to this node is answered with a RECEIVE,
    /// at most once per sender block. Returns the RECEIVE if one was made.
    pub async fn handle_incoming_block(
        &self,
        block: Block,
        origin_key: Option<String>,
    ) -> Result<Option<Block>, NodeError> {
        if block.hash.is_empty() || origin_key.as_deref() == Some(self.public_key.as_str()) {
            return Ok(None);
        }
        let Payload::Send(data) = block.payload() else {
            return Ok(None);
        };
        if normalize_user_id(&data.to_address) != self.user_id {
            return Ok(None);
        }
        if data.amount <= 0 {
            debug!(user = %self.user_id, amount = data.amount, "ignoring non-positive send");
            return Ok(None);
        }
        if !block.has_valid_hash() {
            warn!(user = %self.user_id, index = block.index, "ignoring block with invalid hash");
            return Ok(None);
        }
        if let Some(key) = &origin_key {
            if !block.verify_hex(key) {
                warn!(user = %self.user_id, index = block.index, "ignoring block with invalid signature");
                return Ok(None);
            }
        }

        let from = normalize_user_id(&data.from_address);
        if !self.trust.is_trusted(&from) {
            debug!(user = %self.user_id, %from, "untrusted sender, not receiving");
            return Ok(None);
        }

        let mut chain = self.chain.lock().await;
        if chain.has_receipt_for(&block.hash) {
            debug!(user = %self.user_id, hash = %block.hash, "already received");
            return Ok(None);
        }
        let receipt = chain.receive_transaction(&from, data.amount, &block.hash, &data.message)?;
        info!(user = %self.user_id, %from, amount = data.amount, "auto-received");
        self.commit(chain, receipt).await.map(Some)
    }

    pub fn is_trusted(&self, user_id: &str) -> bool {
        self.trust.is_trusted(user_id)
    }

    pub fn trust_lines(&self) -> Vec<String> {
        self.trust.lines()
    }

    pub async fn add_trust_line(&self, user_id: &str) -> Result<(), NodeError> {
        self.update_trust(user_id, true).await
    }

    pub async fn remove_trust_line(&self, user_id: &str) -> Result<(), NodeError> {
        self.update_trust(user_id, false).await
    }

    async fn update_trust(&self, user_id: &str, trusted: bool) -> Result<(), NodeError> {
        let _guard = self.trust_guard.lock().await;
        let doc = self.trust.document_with(user_id, trusted);
        let value = serde_json::to_value(&doc).map_err(StoreError::from)?;
        self.store.put(TRUST, &self.user_id, value, false).await?;
        self.trust.replace(&doc);
        info!(user = %self.user_id, other = %normalize_user_id(user_id), trusted, "trust line updated");
        Ok(())
    }

    /// Cache `chain` for `node_id` if it is longer than what is cached.
    pub fn update_external_chain(&self, node_id: &str, chain: Vec<Block>) -> bool {
        let node_id = normalize_user_id(node_id);
        let mut cache = self.external_chains.write();
        let cached = cache.get(&node_id).map_or(0, Vec::len);
        if chain.len() <= cached {
            return false;
        }
        debug!(user = %self.user_id, node = %node_id, height = chain.len(), "external chain updated");
        cache.insert(node_id, chain);
        true
    }

    pub fn external_chain(&self, node_id: &str) -> Option<Vec<Block>> {
        self.external_chains
            .read()
            .get(&normalize_user_id(node_id))
            .cloned()
    }

    /// Write the in-memory chain to the store.
    pub async fn save_chain(&self) -> Result<(), NodeError> {
        let chain = self.chain.lock().await;
        self.write_chain(&chain).await?;
        Ok(())
    }

    /// Stop following the feed.
    pub fn shutdown(&self) {
        if let Some(handle) = self.subscription.lock().take() {
            handle.abort();
        }
    }

    async fn write_chain(&self, chain: &Chain) -> Result<(), StoreError> {
        let doc = ChainDocument::new(chain.blocks(), now_millis())?;
        self.store
            .put(CHAINS, &self.user_id, serde_json::to_value(&doc)?, true)
            .await
    }

    /// Publish the new state, save, release the lock and broadcast.
    async fn commit(
        &self,
        chain: impl Deref<Target = Chain>,
        block: Block,
    ) -> Result<Block, NodeError> {
        *self.state.write() = chain.state().clone();
        let saved = self.write_chain(&chain).await;
        drop(chain);

        self.feed
            .broadcast(block.clone(), Some(self.public_key.clone()))
            .await;

        match saved {
            Ok(()) => Ok(block),
            Err(source) => {
                error!(user = %self.user_id, index = block.index, error = %source, "block appended but not saved");
                Err(NodeError::NotPersisted {
                    block: Box::new(block),
                    source,
                })
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(handle) = self.subscription.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("user_id", &self.user_id)
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Run `op` against the locked chain on the blocking pool.
async fn run_blocking<F>(
    mut chain: OwnedMutexGuard<Chain>,
    op: F,
) -> Result<(OwnedMutexGuard<Chain>, Block), NodeError>
where
    F: FnOnce(&mut Chain) -> Result<Block, rp_chain::LedgerError> + Send + 'static,
{
    let (chain, result) = tokio::task::spawn_blocking(move || {
        let result = op(&mut *chain);
        (chain, result)
    })
    .await
    .map_err(|e| NodeError::Worker(e.to_string()))?;
    Ok((chain, result?))
}

async fn follow_feed(node: Weak<Node>, mut subscription: FeedSubscription) {
    while let Some(event) = subscription.next().await {
        let Some(node) = node.upgrade() else {
            break;
        };
        match node.handle_incoming_block(event.block, event.origin_key).await {
            Ok(_) => {}
            Err(e) if e.is_rejection() => debug!(user = %node.user_id, error = %e, "feed block rejected"),
            Err(e) => warn!(user = %node.user_id, error = %e, "failed to handle feed block"),
        }
    }
}

async fn load_document<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &'static str,
    user_id: &str,
) -> Result<Option<T>, NodeError> {
    match store.get(collection, user_id).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| NodeError::Corrupt {
                collection,
                user: user_id.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

async fn load_keys(store: &dyn DocumentStore, user_id: &str) -> Result<NodeKeys, NodeError> {
    if let Some(doc) = load_document::<KeyDocument>(store, KEYS, user_id).await? {
        return NodeKeys::try_from(doc).map_err(|e| NodeError::Corrupt {
            collection: KEYS,
            user: user_id.to_string(),
            reason: e.to_string(),
        });
    }

    let keys = NodeKeys::generate();
    let doc = serde_json::to_value(keys.to_document()).map_err(StoreError::from)?;
    store.put(KEYS, user_id, doc, false).await?;
    info!(user = %user_id, public_key = %keys.public_hex(), "generated node keys");
    Ok(keys)
}
