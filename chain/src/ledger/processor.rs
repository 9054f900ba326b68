// Copyright (c) 2024 Botho Foundation

//! The state transition function.

use tracing::warn;

use super::{AccountState, LedgerError};
use crate::block::{Block, BlockError, Payload};
use crate::contract::ContractRunner;

/// Apply `block` to `state`, returning the next state.
///
/// `state` is left untouched; on error the caller keeps the previous state.
pub fn apply_block(
    state: &AccountState,
    block: &Block,
    runner: &ContractRunner,
) -> Result<AccountState, LedgerError> {
    let mut next = match block.payload() {
        Payload::Genesis(_) => return Ok(state.clone()),
        Payload::Mint(data) => {
            if data.amount <= 0 {
                return Err(LedgerError::InvalidAmount(data.amount));
            }
            let mut next = state.clone();
            next.balance = next.balance.saturating_add(data.amount);
            next.total_supply = next.total_supply.saturating_add(data.amount as u64);
            next
        }
        Payload::Send(data) => {
            let mut next = state.clone();
            next.balance = next.balance.saturating_sub(data.amount);
            next
        }
        Payload::Receive(data) => {
            let mut next = state.clone();
            let held = next.assets.entry(data.from_address.clone()).or_insert(0);
            *held = held.saturating_add(data.amount);
            next
        }
        Payload::Contract(data) => {
            runner.execute(&data.code, state, &data.params, block.timestamp)?
        }
        Payload::Unknown { kind, .. } => {
            warn!(kind = %kind, index = block.index, "unknown block type, no state change");
            state.clone()
        }
        Payload::Malformed { kind, reason } => {
            return Err(LedgerError::Block(BlockError::Malformed {
                kind: kind.clone(),
                reason: reason.clone(),
            }))
        }
    };

    next.transaction_count += 1;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{MintData, ReceiveData, SendData};
    use serde_json::json;

    fn block(payload: Payload) -> Block {
        Block::new(1, 1, payload, "p".to_string())
    }

    #[test]
    fn test_mint_increases_balance_and_supply() {
        let runner = ContractRunner::default();
        let next = apply_block(
            &AccountState::default(),
            &block(Payload::Mint(MintData { amount: 100 })),
            &runner,
        )
        .unwrap();
        assert_eq!(next.balance, 100);
        assert_eq!(next.total_supply, 100);
        assert_eq!(next.transaction_count, 1);
    }

    #[test]
    fn test_non_positive_mint_rejected() {
        let runner = ContractRunner::default();
        for amount in [0, -5] {
            assert_eq!(
                apply_block(
                    &AccountState::default(),
                    &block(Payload::Mint(MintData { amount })),
                    &runner
                ),
                Err(LedgerError::InvalidAmount(amount))
            );
        }
    }

    #[test]
    fn test_send_may_overdraw() {
        let runner = ContractRunner::default();
        let next = apply_block(
            &AccountState::default(),
            &block(Payload::Send(SendData {
                amount: 7,
                to_address: "bob".to_string(),
                from_address: "alice".to_string(),
                message: String::new(),
            })),
            &runner,
        )
        .unwrap();
        assert_eq!(next.balance, -7);
        assert_eq!(next.total_supply, 0);
    }

    #[test]
    fn test_receive_credits_assets_not_balance() {
        let runner = ContractRunner::default();
        let next = apply_block(
            &AccountState::default(),
            &block(Payload::Receive(ReceiveData {
                from_address: "carol".to_string(),
                amount: 25,
                sender_block_hash: "h".to_string(),
                message: String::new(),
            })),
            &runner,
        )
        .unwrap();
        assert_eq!(next.balance, 0);
        assert_eq!(next.asset_balance("carol"), 25);
    }

    #[test]
    fn test_unknown_type_counts_without_state_change() {
        let runner = ContractRunner::default();
        let start = AccountState {
            balance: 3,
            ..Default::default()
        };
        let next = apply_block(
            &start,
            &block(Payload::Unknown {
                kind: "AUDIT".to_string(),
                data: json!({}),
            }),
            &runner,
        )
        .unwrap();
        assert_eq!(next.balance, 3);
        assert_eq!(next.transaction_count, 1);
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let runner = ContractRunner::default();
        let payload = Payload::from_data("MINT", &json!({ "amount": "lots" }));
        let result = apply_block(&AccountState::default(), &block(payload), &runner);
        assert!(matches!(
            result,
            Err(LedgerError::Block(BlockError::Malformed { ref kind, .. })) if kind == "MINT"
        ));
    }
}
