// Copyright (c) 2024 Botho Foundation

//! Document storage for keys, chains and trust lines.
//!
//! Documents are JSON values addressed by `(collection, id)`. Writes with
//! `merge = true` shallow-merge object fields into the stored document.

mod lmdb_store;
mod memory;

pub use self::lmdb_store::LmdbStore;
pub use self::memory::MemoryStore;

use async_trait::async_trait;
use rp_chain::Block;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Key pair per user.
pub const KEYS: &str = "keys";
/// `{chain, lastUpdated}` per user.
pub const CHAINS: &str = "chains";
/// `{lines}` per user.
pub const TRUST: &str = "trust";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    async fn put(
        &self,
        collection: &str,
        id: &str,
        document: Value,
        merge: bool,
    ) -> Result<(), StoreError>;

    /// Deleting a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    async fn list_all(&self, collection: &str) -> Result<Vec<Value>, StoreError>;
}

/// Combine a stored document with a new one.
pub(crate) fn merge_documents(existing: Option<Value>, document: Value, merge: bool) -> Value {
    match (existing, document, merge) {
        (Some(Value::Object(mut base)), Value::Object(update), true) => {
            base.extend(update);
            Value::Object(base)
        }
        (_, document, _) => document,
    }
}

/// Stored shape of a user's chain.
///
/// Entries stay raw JSON so that one bad entry never fails the whole
/// document; see [`ChainDocument::into_blocks`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDocument {
    pub chain: Vec<Value>,
    /// When the chain was last saved, in milliseconds.
    #[serde(default)]
    pub last_updated: u64,
}

impl ChainDocument {
    pub fn new(blocks: &[Block], last_updated: u64) -> Result<Self, StoreError> {
        let chain = blocks
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()?;
        Ok(Self {
            chain,
            last_updated,
        })
    }

    /// Decode every entry on its own.
    ///
    /// Returns the blocks plus `(position, reason)` for entries that are not
    /// blocks at all. Blocks whose payload does not decode are kept; the chain
    /// skips them when replaying.
    pub fn into_blocks(self) -> (Vec<Block>, Vec<(usize, String)>) {
        let mut blocks = Vec::with_capacity(self.chain.len());
        let mut undecodable = Vec::new();
        for (position, entry) in self.chain.into_iter().enumerate() {
            match serde_json::from_value::<Block>(entry) {
                Ok(block) => blocks.push(block),
                Err(e) => undecodable.push((position, e.to_string())),
            }
        }
        (blocks, undecodable)
    }
}

/// Stored shape of a user's trust lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustDocument {
    #[serde(default)]
    pub lines: Vec<String>,
}
