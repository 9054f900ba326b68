// Copyright (c) 2024 Botho Foundation

//! Per-user chains and the state they derive.

mod chain;
mod processor;

pub use chain::{Chain, InflationStats, ReplayError};
pub use processor::apply_block;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::block::BlockError;
use crate::contract::ContractError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid previous hash at index {index}: expected {expected}, got {found}")]
    Linkage {
        index: u64,
        expected: String,
        found: String,
    },

    #[error("Invalid block index: expected {expected}, got {found}")]
    Sequence { expected: u64, found: u64 },

    #[error("Invalid block hash at index {index}")]
    Integrity { index: u64 },

    #[error("Invalid block signature at index {index}")]
    Signature { index: u64 },

    #[error("Mint amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Block(#[from] BlockError),
}

/// State derived by folding the transition function over a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    /// Native balance; may go negative.
    pub balance: i64,
    pub total_supply: u64,
    pub transaction_count: u64,
    /// Holdings of other issuers' assets, keyed by issuer.
    #[serde(default)]
    pub assets: BTreeMap<String, i64>,
    /// Issuer-side ledger of this user's asset, maintained by contracts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger: Option<BTreeMap<String, i64>>,
}

impl AccountState {
    /// Ledger entry for `account`, 0 when absent.
    pub fn ledger_balance(&self, account: &str) -> i64 {
        self.ledger
            .as_ref()
            .and_then(|l| l.get(account).copied())
            .unwrap_or(0)
    }

    /// Holding of `issuer`'s asset, 0 when absent.
    pub fn asset_balance(&self, issuer: &str) -> i64 {
        self.assets.get(issuer).copied().unwrap_or(0)
    }
}
