// Copyright (c) 2024 Botho Foundation

//! Per-user ledgers for the republic network.
//!
//! Every user owns one append-only chain of signed blocks. The chain derives
//! an [`AccountState`] by folding a deterministic transition function over
//! its blocks; CONTRACT blocks run typed operations through the
//! [`ContractRunner`] under a wall-clock limit.

pub mod block;
pub mod contract;
pub mod crypto;
pub mod ledger;
pub mod portfolio;
pub mod transfer;

pub use block::{Block, BlockError, BlockType, Payload};
pub use contract::{ContractError, ContractRunner, Operand, Operation};
pub use crypto::{KeyDocument, NodeKeys};
pub use ledger::{AccountState, Chain, InflationStats, LedgerError, ReplayError};
pub use portfolio::Portfolio;
pub use transfer::TransferRequest;

/// Normalize a user identifier: trimmed and lowercased.
pub fn normalize_user_id(user_id: &str) -> String {
    user_id.trim().to_lowercase()
}
