// Copyright (c) 2024 Botho Foundation

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{apply_block, AccountState, LedgerError};
use crate::block::{now_millis, Block, ContractData, MintData, Payload, ReceiveData, SendData};
use crate::contract::{ContractRunner, Operation};
use crate::crypto::NodeKeys;

/// Supply figures reported for a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InflationStats {
    pub total_minted: u64,
    pub current_balance: i64,
    pub circulating_supply: u64,
}

/// A block skipped while rebuilding state from stored history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayError {
    pub index: u64,
    pub error: LedgerError,
}

/// One user's append-only chain and its derived state.
pub struct Chain {
    user_id: String,
    blocks: Vec<Block>,
    state: AccountState,
    keys: Option<NodeKeys>,
    runner: ContractRunner,
}

impl Chain {
    /// A genesis-only chain.
    pub fn new(user_id: impl Into<String>, keys: Option<NodeKeys>, runner: ContractRunner) -> Self {
        Self {
            user_id: user_id.into(),
            blocks: vec![Block::genesis(now_millis())],
            state: AccountState::default(),
            keys,
            runner,
        }
    }

    /// Rebuild a chain from stored blocks, replaying the state leniently.
    ///
    /// Blocks that fail to replay stay in the chain but contribute nothing to
    /// the state; they are returned so the caller can report them.
    pub fn from_blocks(
        user_id: impl Into<String>,
        blocks: Vec<Block>,
        keys: Option<NodeKeys>,
        runner: ContractRunner,
    ) -> (Self, Vec<ReplayError>) {
        let mut chain = Self::new(user_id, keys, runner);
        if blocks.is_empty() {
            return (chain, Vec::new());
        }
        chain.blocks = blocks;
        let errors = chain.replay();
        (chain, errors)
    }

    /// Recompute `state` from index 1 onward, skipping blocks that fail.
    pub fn replay(&mut self) -> Vec<ReplayError> {
        let mut state = AccountState::default();
        let mut errors = Vec::new();

        for block in self.blocks.iter().skip(1) {
            let result = if block.has_valid_hash() {
                apply_block(&state, block, &self.runner)
            } else {
                Err(LedgerError::Integrity { index: block.index })
            };
            match result {
                Ok(next) => state = next,
                Err(error) => {
                    warn!(user = %self.user_id, index = block.index, %error, "error replaying block, skipped");
                    errors.push(ReplayError {
                        index: block.index,
                        error,
                    });
                }
            }
        }

        debug!(user = %self.user_id, height = self.blocks.len(), "chain replayed");
        self.state = state;
        errors
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn state(&self) -> &AccountState {
        &self.state
    }

    pub fn keys(&self) -> Option<&NodeKeys> {
        self.keys.as_ref()
    }

    pub fn latest(&self) -> &Block {
        // A chain always holds at least its genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    /// Build, sign and append the next block.
    pub fn create_block(&mut self, payload: Payload) -> Result<Block, LedgerError> {
        let latest = self.latest();
        let mut block = Block::new(
            latest.index + 1,
            now_millis(),
            payload,
            latest.hash.clone(),
        );
        if let Some(keys) = &self.keys {
            block.sign(keys.signing_key());
        }
        self.append_block(block.clone())?;
        Ok(block)
    }

    /// Validate `block` against the tip and apply it atomically.
    pub fn append_block(&mut self, block: Block) -> Result<(), LedgerError> {
        let latest = self.latest();
        if block.previous_hash != latest.hash {
            return Err(LedgerError::Linkage {
                index: block.index,
                expected: latest.hash.clone(),
                found: block.previous_hash,
            });
        }
        if block.index != latest.index + 1 {
            return Err(LedgerError::Sequence {
                expected: latest.index + 1,
                found: block.index,
            });
        }
        if !block.has_valid_hash() {
            return Err(LedgerError::Integrity { index: block.index });
        }
        if let Some(keys) = &self.keys {
            if !block.verify(keys.verifying_key()) {
                return Err(LedgerError::Signature { index: block.index });
            }
        }

        let next = apply_block(&self.state, &block, &self.runner)?;
        self.state = next;
        self.blocks.push(block);
        Ok(())
    }

    /// Pairwise hash and linkage check over the whole chain.
    pub fn is_valid(&self) -> bool {
        self.blocks.windows(2).all(|pair| {
            let (previous, current) = (&pair[0], &pair[1]);
            current.has_valid_hash() && current.previous_hash == previous.hash
        })
    }

    pub fn mint(&mut self, amount: i64) -> Result<Block, LedgerError> {
        self.create_block(Payload::Mint(MintData { amount }))
    }

    pub fn create_transaction(
        &mut self,
        amount: i64,
        to_address: &str,
        message: &str,
    ) -> Result<Block, LedgerError> {
        let data = SendData {
            amount,
            to_address: to_address.to_string(),
            from_address: self.user_id.clone(),
            message: message.to_string(),
        };
        self.create_block(Payload::Send(data))
    }

    pub fn receive_transaction(
        &mut self,
        from_address: &str,
        amount: i64,
        sender_block_hash: &str,
        message: &str,
    ) -> Result<Block, LedgerError> {
        let data = ReceiveData {
            from_address: from_address.to_string(),
            amount,
            sender_block_hash: sender_block_hash.to_string(),
            message: message.to_string(),
        };
        self.create_block(Payload::Receive(data))
    }

    pub fn run_contract(
        &mut self,
        code: Vec<Operation>,
        params: BTreeMap<String, Value>,
    ) -> Result<Block, LedgerError> {
        self.create_block(Payload::Contract(ContractData { code, params }))
    }

    /// Whether a RECEIVE already references `sender_block_hash`.
    pub fn has_receipt_for(&self, sender_block_hash: &str) -> bool {
        self.blocks.iter().any(|b| match b.payload() {
            Payload::Receive(data) => data.sender_block_hash == sender_block_hash,
            _ => false,
        })
    }

    pub fn inflation_stats(&self) -> InflationStats {
        InflationStats {
            total_minted: self.state.total_supply,
            current_balance: self.state.balance,
            circulating_supply: self.state.total_supply,
        }
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("user_id", &self.user_id)
            .field("height", &self.blocks.len())
            .field("state", &self.state)
            .finish()
    }
}
