// Copyright (c) 2024 Botho Foundation

//! End-to-end node behaviour against in-memory collaborators.

use republic::feed::{BlockFeed, MemoryFeed};
use republic::storage::{ChainDocument, DocumentStore, LmdbStore, MemoryStore, CHAINS, KEYS};
use republic::{Node, NodeError, NodeRegistry, SendOutcome};
use rp_chain::block::{now_millis, MintData, Payload};
use rp_chain::{Block, Chain, ContractRunner, LedgerError, NodeKeys, Operand, Operation};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

async fn spawn(store: Arc<dyn DocumentStore>, feed: Arc<dyn BlockFeed>, user: &str) -> Arc<Node> {
    Node::initialize(user, store, feed, ContractRunner::default())
        .await
        .unwrap()
}

async fn fresh(user: &str) -> Arc<Node> {
    spawn(Arc::new(MemoryStore::new()), Arc::new(MemoryFeed::new()), user).await
}

#[tokio::test]
async fn test_mint_then_send() {
    let node = fresh("alice").await;

    node.mint(100).await.unwrap();
    let state = node.state();
    assert_eq!(state.balance, 100);
    assert_eq!(state.total_supply, 100);
    assert_eq!(node.blocks().await.len(), 2);

    let block = node.create_transaction(60, "bob", "lunch").await.unwrap();
    assert_eq!(block.to_address(), Some("bob"));
    let state = node.state();
    assert_eq!(state.balance, 40);
    assert_eq!(state.total_supply, 100);
    assert_eq!(node.blocks().await.len(), 3);

    let info = node.info().await;
    assert!(info.valid);
    assert_eq!(info.inflation.total_minted, 100);
    assert_eq!(info.inflation.current_balance, 40);
}

#[tokio::test]
async fn test_trusted_send_is_auto_received() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let feed: Arc<dyn BlockFeed> = Arc::new(MemoryFeed::new());
    let alice = spawn(store.clone(), feed.clone(), "alice").await;
    let carol = spawn(store.clone(), feed.clone(), "carol").await;

    let send = carol.create_transaction(25, "alice", "hi").await.unwrap();

    assert!(eventually(|| alice.state().asset_balance("carol") == 25).await);
    assert_eq!(alice.state().balance, 0);
    assert_eq!(carol.state().balance, -25);

    // The sender block is only received once.
    let again = alice
        .handle_incoming_block(send, Some(carol.public_key().to_string()))
        .await
        .unwrap();
    assert!(again.is_none());
    assert_eq!(alice.blocks().await.len(), 2);
}

#[tokio::test]
async fn test_untrusted_send_is_not_received() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let feed: Arc<dyn BlockFeed> = Arc::new(MemoryFeed::new());
    let alice = spawn(store.clone(), feed.clone(), "alice").await;
    alice.add_trust_line("bob").await.unwrap();
    let carol = spawn(store.clone(), feed.clone(), "carol").await;

    let send = carol.create_transaction(25, "alice", "").await.unwrap();
    let received = alice
        .handle_incoming_block(send, Some(carol.public_key().to_string()))
        .await
        .unwrap();
    assert!(received.is_none());
    assert_eq!(alice.state().asset_balance("carol"), 0);
}

#[tokio::test]
async fn test_forged_send_is_ignored() {
    let alice = fresh("alice").await;
    let carol = fresh("carol").await;
    let send = carol.create_transaction(5, "alice", "").await.unwrap();

    let impostor = NodeKeys::generate().public_hex();
    let received = alice.handle_incoming_block(send, Some(impostor)).await.unwrap();
    assert!(received.is_none());
}

#[tokio::test]
async fn test_replay_skips_bad_block() {
    let store = Arc::new(MemoryStore::new());
    let keys = NodeKeys::generate();

    let mut chain = Chain::new("alice", Some(keys.clone()), ContractRunner::default());
    chain.mint(50).unwrap();
    let tip = chain.latest().clone();
    let mut bad = Block::new(
        tip.index + 1,
        now_millis(),
        Payload::Mint(MintData { amount: -5 }),
        tip.hash.clone(),
    );
    bad.sign(keys.signing_key());
    let mut blocks = chain.blocks().to_vec();
    blocks.push(bad);

    let (_, errors) = Chain::from_blocks("alice", blocks.clone(), None, ContractRunner::default());
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].index, 2);
    assert_eq!(errors[0].error, LedgerError::InvalidAmount(-5));

    store
        .put(KEYS, "alice", serde_json::to_value(keys.to_document()).unwrap(), false)
        .await
        .unwrap();
    let doc = ChainDocument::new(&blocks, now_millis()).unwrap();
    store
        .put(CHAINS, "alice", serde_json::to_value(&doc).unwrap(), false)
        .await
        .unwrap();

    let node = spawn(store, Arc::new(MemoryFeed::new()), "alice").await;
    assert_eq!(node.state().balance, 50);
    assert_eq!(node.blocks().await.len(), 3);
    assert_eq!(node.public_key(), keys.public_hex());
}

#[tokio::test]
async fn test_receive_respects_trust_lines() {
    let alice = fresh("alice").await;
    alice.receive_transaction("carol", 3, "h0", "").await.unwrap();

    alice.add_trust_line("bob").await.unwrap();
    let err = alice.receive_transaction("carol", 10, "h1", "").await.unwrap_err();
    assert!(matches!(err, NodeError::Trust(ref user) if user == "carol"));
    assert!(err.is_rejection());

    alice.receive_transaction("Bob", 10, "h2", "").await.unwrap();
    let state = alice.state();
    assert_eq!(state.asset_balance("bob"), 10);
    assert_eq!(state.asset_balance("carol"), 3);
    assert_eq!(state.balance, 0);
    assert_eq!(alice.portfolio().balance("bob"), 10);
}

#[tokio::test]
async fn test_failed_save_is_retried_not_reapplied() {
    let store = Arc::new(MemoryStore::new());
    let node = spawn(store.clone(), Arc::new(MemoryFeed::new()), "alice").await;

    store.set_fail_writes(true);
    let err = node.mint(10).await.unwrap_err();
    match err {
        NodeError::NotPersisted { block, .. } => assert_eq!(block.index, 1),
        other => panic!("expected NotPersisted, got {other:?}"),
    }
    assert_eq!(node.state().balance, 10);
    assert!(node.save_chain().await.is_err());

    store.set_fail_writes(false);
    node.save_chain().await.unwrap();
    node.shutdown();
    drop(node);

    let reloaded = spawn(store, Arc::new(MemoryFeed::new()), "alice").await;
    assert_eq!(reloaded.state().balance, 10);
    assert_eq!(reloaded.blocks().await.len(), 2);
}

#[tokio::test]
async fn test_transfer_request_between_holders() {
    let registry = NodeRegistry::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryFeed::new()),
        ContractRunner::default(),
    );
    let gold = registry.get_or_spawn("gold").await.unwrap();
    let alice = registry.get_or_spawn("alice").await.unwrap();

    gold.mint(100).await.unwrap();
    let credit = Operation::Credit {
        account: "alice".to_string(),
        amount: Operand::Lit(40),
    };
    gold.run_contract(vec![credit], BTreeMap::new()).await.unwrap();

    let SendOutcome::Remote { issuer, request } =
        alice.send_asset("gold", 15, "bob", "rent").await.unwrap()
    else {
        panic!("expected a transfer request");
    };
    assert_eq!(issuer, "gold");

    let receipt = gold.handle_transfer_request(&request).await.unwrap();
    assert!(receipt.success);
    assert_eq!(gold.balance_for_user("alice"), 25);
    assert_eq!(gold.balance_for_user("bob"), 15);
    assert_eq!(gold.state().balance, 100);

    let retry = alice.send_asset("gold", 30, "bob", "").await.unwrap();
    let SendOutcome::Remote { request, .. } = retry else {
        panic!("expected a transfer request");
    };
    assert!(matches!(
        gold.handle_transfer_request(&request).await,
        Err(NodeError::InsufficientFunds { balance: 25, requested: 30, .. })
    ));
}

#[tokio::test]
async fn test_contract_timeout_leaves_chain_unchanged() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let node = Node::initialize(
        "alice",
        store,
        Arc::new(MemoryFeed::new()),
        ContractRunner::new(Duration::from_millis(50)),
    )
    .await
    .unwrap();

    let spin = Operation::Repeat {
        times: None,
        body: vec![Operation::Credit {
            account: "x".to_string(),
            amount: Operand::Lit(0),
        }],
    };
    let started = std::time::Instant::now();
    let err = node.run_contract(vec![spin], BTreeMap::new()).await.unwrap_err();
    assert!(matches!(err, NodeError::Ledger(LedgerError::Contract(_))));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(node.blocks().await.len(), 1);
}

#[tokio::test]
async fn test_lmdb_backed_node_survives_restart() {
    let dir = tempdir().unwrap();
    {
        let store: Arc<dyn DocumentStore> = Arc::new(LmdbStore::open(dir.path()).unwrap());
        let node = spawn(store, Arc::new(MemoryFeed::new()), "alice").await;
        node.mint(7).await.unwrap();
        node.add_trust_line("bob").await.unwrap();
        node.shutdown();
    }

    let store: Arc<dyn DocumentStore> = Arc::new(LmdbStore::open(dir.path()).unwrap());
    let node = spawn(store, Arc::new(MemoryFeed::new()), "alice").await;
    assert_eq!(node.state().balance, 7);
    assert_eq!(node.trust_lines(), vec!["bob".to_string()]);
}

#[tokio::test]
async fn test_malformed_stored_block_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let keys = NodeKeys::generate();

    let mut chain = Chain::new("alice", Some(keys.clone()), ContractRunner::default());
    chain.mint(50).unwrap();
    let tip = chain.latest().clone();

    let mut bad: Block = serde_json::from_value(json!({
        "index": tip.index + 1,
        "timestamp": now_millis(),
        "data": { "amount": "lots" },
        "previousHash": tip.hash,
        "type": "MINT",
        "hash": ""
    }))
    .unwrap();
    bad.hash = bad.compute_hash();

    let mut doc = ChainDocument::new(chain.blocks(), now_millis()).unwrap();
    doc.chain.push(serde_json::to_value(&bad).unwrap());
    doc.chain.push(json!({ "index": 3, "type": "MINT" }));

    store
        .put(KEYS, "alice", serde_json::to_value(keys.to_document()).unwrap(), false)
        .await
        .unwrap();
    store
        .put(CHAINS, "alice", serde_json::to_value(&doc).unwrap(), false)
        .await
        .unwrap();

    let node = spawn(store, Arc::new(MemoryFeed::new()), "alice").await;
    assert_eq!(node.state().balance, 50);
    assert_eq!(node.blocks().await.len(), 3);

    // The node keeps appending after the skipped block.
    node.mint(5).await.unwrap();
    assert_eq!(node.state().balance, 55);
}

#[tokio::test]
async fn test_non_positive_send_is_not_received() {
    let alice = fresh("alice").await;
    let carol = fresh("carol").await;

    let mut chain = Chain::new("carol", Some(carol.keys().clone()), ContractRunner::default());
    let send = chain.create_transaction(-10, "alice", "").unwrap();
    let received = alice
        .handle_incoming_block(send, Some(carol.public_key().to_string()))
        .await
        .unwrap();
    assert!(received.is_none());
    assert_eq!(alice.state().asset_balance("carol"), 0);

    let err = alice.receive_transaction("carol", 0, "h0", "").await.unwrap_err();
    assert!(matches!(err, NodeError::InvalidRequest(_)));
    assert_eq!(alice.blocks().await.len(), 1);
}

#[tokio::test]
async fn test_contract_does_not_stall_other_tasks() {
    let node = Node::initialize(
        "alice",
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryFeed::new()),
        ContractRunner::new(Duration::from_millis(300)),
    )
    .await
    .unwrap();

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let spin = Operation::Repeat {
        times: None,
        body: vec![Operation::Credit {
            account: "x".to_string(),
            amount: Operand::Lit(0),
        }],
    };
    let result = node.run_contract(vec![spin], BTreeMap::new()).await;
    ticker.abort();

    assert!(result.is_err());
    assert!(ticks.load(Ordering::SeqCst) >= 5);
}
