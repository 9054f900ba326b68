// Copyright (c) 2024 Botho Foundation

use rp_chain::{Block, LedgerError};
use thiserror::Error;

use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Insufficient funds for {user}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        user: String,
        balance: i64,
        requested: i64,
    },

    #[error("{0} is not a trusted sender")]
    Trust(String),

    #[error("Node {node} is not the issuer {issuer}")]
    NotIssuer { node: String, issuer: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// The block is in the in-memory chain but the save failed. Retry
    /// `Node::save_chain`; repeating the operation would apply it twice.
    #[error("Block {} appended but not saved: {source}", .block.index)]
    NotPersisted {
        block: Box<Block>,
        #[source]
        source: StoreError,
    },

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Corrupt {collection} document for {user}: {reason}")]
    Corrupt {
        collection: &'static str,
        user: String,
        reason: String,
    },
}

impl NodeError {
    /// Expected business-rule rejections, as opposed to system failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            NodeError::InsufficientFunds { .. }
                | NodeError::Trust(_)
                | NodeError::NotIssuer { .. }
                | NodeError::InvalidRequest(_)
                | NodeError::Ledger(LedgerError::InvalidAmount(_))
        )
    }
}
