// Copyright (c) 2024 Botho Foundation

//! Ledger blocks: hashing, signing and verification.
//!
//! A block hash is `SHA256(index ‖ previousHash ‖ timestamp ‖ canonical(data) ‖ type ‖ signature)`
//! with the numeric fields rendered in decimal. The signed "content hash" is the
//! same digest without the signature, so signing recomputes `hash` afterwards.
//!
//! `canonical(data)` is compact JSON with object keys sorted, taken over the
//! `data` object exactly as the block carries it. The typed [`Payload`] is a
//! view derived from that object, so extra or missing keys never change the
//! hash.

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::contract::ContractProgram;
use crate::crypto::{self, NodeKeys};

/// `previousHash` of every genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Message stored in the genesis payload.
pub const GENESIS_MESSAGE: &str = "Genesis Block";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("No private key available to sign the block")]
    Signing,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Malformed {kind} payload: {reason}")]
    Malformed { kind: String, reason: String },
}

/// Current time in milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The closed set of block kinds understood by the state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Genesis,
    Mint,
    Send,
    Receive,
    Contract,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Genesis => "GENESIS",
            BlockType::Mint => "MINT",
            BlockType::Send => "SEND",
            BlockType::Receive => "RECEIVE",
            BlockType::Contract => "CONTRACT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GENESIS" => Some(BlockType::Genesis),
            "MINT" => Some(BlockType::Mint),
            "SEND" => Some(BlockType::Send),
            "RECEIVE" => Some(BlockType::Receive),
            "CONTRACT" => Some(BlockType::Contract),
            _ => None,
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisData {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintData {
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendData {
    pub amount: i64,
    pub to_address: String,
    pub from_address: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveData {
    pub from_address: String,
    pub amount: i64,
    pub sender_block_hash: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractData {
    /// Operations executed by the contract runner.
    pub code: ContractProgram,
    /// Read-only transaction parameters visible to the operations.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

/// Typed block payload, one variant per block type.
///
/// `Unknown` covers types this node does not understand and `Malformed` a
/// known type whose data does not decode. Both keep the block (and its hash)
/// intact; neither is ever applied to state.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Genesis(GenesisData),
    Mint(MintData),
    Send(SendData),
    Receive(ReceiveData),
    Contract(ContractData),
    Unknown { kind: String, data: Value },
    Malformed { kind: String, reason: String },
}

impl Payload {
    /// Wire name of the block type.
    pub fn kind(&self) -> &str {
        match self {
            Payload::Genesis(_) => BlockType::Genesis.as_str(),
            Payload::Mint(_) => BlockType::Mint.as_str(),
            Payload::Send(_) => BlockType::Send.as_str(),
            Payload::Receive(_) => BlockType::Receive.as_str(),
            Payload::Contract(_) => BlockType::Contract.as_str(),
            Payload::Unknown { kind, .. } | Payload::Malformed { kind, .. } => kind,
        }
    }

    pub fn block_type(&self) -> Option<BlockType> {
        BlockType::parse(self.kind())
    }

    /// Encode a payload built locally. Received blocks keep their own data.
    fn to_data(&self) -> Value {
        let value = match self {
            Payload::Genesis(d) => serde_json::to_value(d),
            Payload::Mint(d) => serde_json::to_value(d),
            Payload::Send(d) => serde_json::to_value(d),
            Payload::Receive(d) => serde_json::to_value(d),
            Payload::Contract(d) => serde_json::to_value(d),
            Payload::Unknown { data, .. } => return data.clone(),
            Payload::Malformed { .. } => return Value::Object(Default::default()),
        };
        value.unwrap_or_default()
    }

    /// Typed view of `data` for a block of type `kind`.
    pub fn from_data(kind: &str, data: &Value) -> Self {
        fn decode<T: serde::de::DeserializeOwned>(
            kind: &str,
            data: &Value,
            wrap: fn(T) -> Payload,
        ) -> Payload {
            match T::deserialize(data) {
                Ok(typed) => wrap(typed),
                Err(e) => Payload::Malformed {
                    kind: kind.to_string(),
                    reason: e.to_string(),
                },
            }
        }

        match BlockType::parse(kind) {
            Some(BlockType::Genesis) => decode(kind, data, Payload::Genesis),
            Some(BlockType::Mint) => decode(kind, data, Payload::Mint),
            Some(BlockType::Send) => decode(kind, data, Payload::Send),
            Some(BlockType::Receive) => decode(kind, data, Payload::Receive),
            Some(BlockType::Contract) => decode(kind, data, Payload::Contract),
            None => Payload::Unknown {
                kind: kind.to_string(),
                data: data.clone(),
            },
        }
    }

    /// The decode error for a `Malformed` payload.
    pub fn malformed(&self) -> Option<BlockError> {
        match self {
            Payload::Malformed { kind, reason } => Some(BlockError::Malformed {
                kind: kind.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// A ledger entry.
///
/// Header fields are public so that persisted or received blocks can be
/// inspected, but anything that changes a hashed field after `hash` was
/// computed is detected by [`Block::has_valid_hash`] and by chain validation.
/// `data` and its typed view are kept together and only read through
/// [`Block::data`] and [`Block::payload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawBlock", into = "RawBlock")]
pub struct Block {
    pub index: u64,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    data: Value,
    payload: Payload,
    pub previous_hash: String,
    /// Hex Ed25519 signature over the content hash; empty when unsigned.
    pub signature: String,
    pub hash: String,
}

impl Block {
    /// Build an unsigned block and compute its hash.
    pub fn new(index: u64, timestamp: u64, payload: Payload, previous_hash: String) -> Self {
        let mut block = Self {
            index,
            timestamp,
            data: payload.to_data(),
            payload,
            previous_hash,
            signature: String::new(),
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Create a genesis block stamped with `timestamp`.
    pub fn genesis(timestamp: u64) -> Self {
        Self::new(
            0,
            timestamp,
            Payload::Genesis(GenesisData {
                message: GENESIS_MESSAGE.to_string(),
            }),
            GENESIS_PREVIOUS_HASH.to_string(),
        )
    }

    /// The `data` object exactly as carried on the wire.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Typed view of [`Block::data`].
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Replace `data` without rehashing.
    #[cfg(test)]
    pub(crate) fn set_data(&mut self, data: Value) {
        self.payload = Payload::from_data(self.payload.kind(), &data);
        self.data = data;
    }

    /// Wire name of this block's type.
    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    pub fn block_type(&self) -> Option<BlockType> {
        self.payload.block_type()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && matches!(self.payload, Payload::Genesis(_))
    }

    /// Recipient of a SEND block.
    pub fn to_address(&self) -> Option<&str> {
        match &self.payload {
            Payload::Send(d) => Some(d.to_address.as_str()),
            Payload::Unknown { .. } => self.data.get("toAddress").and_then(Value::as_str),
            _ => None,
        }
    }

    fn digest(&self, include_signature: bool) -> String {
        let data = serde_json::to_string(&self.data).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_string().as_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(self.timestamp.to_string().as_bytes());
        hasher.update(data.as_bytes());
        hasher.update(self.kind().as_bytes());
        if include_signature {
            hasher.update(self.signature.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Hash over every field including the signature.
    pub fn compute_hash(&self) -> String {
        self.digest(true)
    }

    /// Hash over the content only; this is what gets signed.
    pub fn content_hash(&self) -> String {
        self.digest(false)
    }

    /// Whether the stored hash matches the recomputed one.
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Sign the content hash, then recompute `hash` to cover the signature.
    pub fn sign(&mut self, signing_key: &SigningKey) {
        self.signature = crypto::sign_hex(signing_key, self.content_hash().as_bytes());
        self.hash = self.compute_hash();
    }

    /// Sign with a hex-encoded private key. An empty key is a signing error.
    pub fn sign_with_private_hex(&mut self, private_hex: &str) -> Result<(), BlockError> {
        let keys = NodeKeys::from_private_hex(private_hex)?;
        self.sign(keys.signing_key());
        Ok(())
    }

    /// Verify the signature against `public_key`. Unsigned blocks never verify.
    pub fn verify(&self, public_key: &VerifyingKey) -> bool {
        if self.signature.is_empty() {
            return false;
        }
        crypto::verify_hex(public_key, self.content_hash().as_bytes(), &self.signature)
    }

    /// Verify against a hex-encoded public key; malformed keys verify as false.
    pub fn verify_hex(&self, public_hex: &str) -> bool {
        crypto::parse_public_hex(public_hex)
            .map(|key| self.verify(&key))
            .unwrap_or(false)
    }
}

/// Wire/storage shape of a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    index: u64,
    timestamp: u64,
    data: Value,
    previous_hash: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    signature: String,
    hash: String,
}

impl From<RawBlock> for Block {
    fn from(raw: RawBlock) -> Self {
        Block {
            index: raw.index,
            timestamp: raw.timestamp,
            payload: Payload::from_data(&raw.kind, &raw.data),
            data: raw.data,
            previous_hash: raw.previous_hash,
            signature: raw.signature,
            hash: raw.hash,
        }
    }
}

impl From<Block> for RawBlock {
    fn from(block: Block) -> Self {
        RawBlock {
            index: block.index,
            timestamp: block.timestamp,
            data: block.data,
            previous_hash: block.previous_hash,
            kind: block.payload.kind().to_string(),
            signature: block.signature,
            hash: block.hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mint_block(amount: i64) -> Block {
        Block::new(1, 1_700_000_000_000, Payload::Mint(MintData { amount }), "abc".to_string())
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = mint_block(10);
        let b = mint_block(10);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
        assert!(a.has_valid_hash());
    }

    #[test]
    fn test_hash_matches_concatenation() {
        let block = mint_block(10);
        let mut hasher = Sha256::new();
        hasher.update(b"1abc1700000000000{\"amount\":10}MINT");
        assert_eq!(block.hash, hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_sign_and_verify() {
        let keys = NodeKeys::generate();
        let mut block = mint_block(10);
        let unsigned_hash = block.hash.clone();

        block.sign(keys.signing_key());
        assert!(!block.signature.is_empty());
        assert_ne!(block.hash, unsigned_hash);
        assert!(block.has_valid_hash());
        assert!(block.verify(keys.verifying_key()));
        assert!(block.verify_hex(&keys.public_hex()));
    }

    #[test]
    fn test_verify_with_other_key_fails() {
        let keys = NodeKeys::generate();
        let other = NodeKeys::generate();
        let mut block = mint_block(10);
        block.sign(keys.signing_key());
        assert!(!block.verify(other.verifying_key()));
    }

    #[test]
    fn test_unsigned_block_does_not_verify() {
        let keys = NodeKeys::generate();
        assert!(!mint_block(10).verify(keys.verifying_key()));
    }

    #[test]
    fn test_sign_without_private_key_fails() {
        let mut block = mint_block(10);
        assert_eq!(block.sign_with_private_hex(""), Err(BlockError::Signing));
        assert!(block.signature.is_empty());
    }

    #[test]
    fn test_tampered_amount_breaks_hash_and_signature() {
        let keys = NodeKeys::generate();
        let mut block = mint_block(10);
        block.sign(keys.signing_key());

        block.set_data(json!({ "amount": 1_000 }));
        assert!(!block.has_valid_hash());
        assert!(!block.verify(keys.verifying_key()));
    }

    #[test]
    fn test_wire_format() {
        let block = Block::new(
            2,
            5,
            Payload::Send(SendData {
                amount: 60,
                to_address: "bob".to_string(),
                from_address: "alice".to_string(),
                message: "rent".to_string(),
            }),
            "prev".to_string(),
        );

        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "SEND");
        assert_eq!(value["previousHash"], "prev");
        assert_eq!(value["data"]["toAddress"], "bob");
        assert_eq!(value["signature"], "");

        let parsed: Block = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, block);
        assert_eq!(parsed.to_address(), Some("bob"));
    }

    #[test]
    fn test_unknown_type_keeps_hash() {
        let raw = json!({
            "index": 3,
            "timestamp": 9,
            "data": { "note": "hello" },
            "previousHash": "p",
            "type": "AUDIT",
            "signature": "",
            "hash": ""
        });
        let mut block: Block = serde_json::from_value(raw).unwrap();
        assert_eq!(block.kind(), "AUDIT");
        assert_eq!(block.block_type(), None);

        block.hash = block.compute_hash();
        let reparsed: Block = serde_json::from_str(&serde_json::to_string(&block).unwrap()).unwrap();
        assert!(reparsed.has_valid_hash());
    }

    fn sorted_hash(index: u64, previous: &str, timestamp: u64, data: &str, kind: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{index}{previous}{timestamp}{data}{kind}").as_bytes());
        hex::encode(hasher.finalize())
    }

    #[test]
    fn test_malformed_known_payload_is_kept() {
        let data = r#"{"amount":"lots"}"#;
        let raw = json!({
            "index": 1,
            "timestamp": 9,
            "data": { "amount": "lots" },
            "previousHash": "p",
            "type": "MINT",
            "hash": sorted_hash(1, "p", 9, data, "MINT")
        });
        let block: Block = serde_json::from_value(raw).unwrap();
        assert!(block.has_valid_hash());
        assert_eq!(block.kind(), "MINT");
        assert!(matches!(block.payload(), Payload::Malformed { kind, .. } if kind == "MINT"));
        assert!(block.payload().malformed().is_some());
    }

    #[test]
    fn test_hash_covers_data_as_received() {
        let data = r#"{"amount":5,"memo":"x"}"#;
        let raw = json!({
            "index": 1,
            "timestamp": 9,
            "data": { "memo": "x", "amount": 5 },
            "previousHash": "p",
            "type": "MINT",
            "hash": sorted_hash(1, "p", 9, data, "MINT")
        });
        let block: Block = serde_json::from_value(raw).unwrap();
        assert!(block.has_valid_hash());
        assert_eq!(block.payload(), &Payload::Mint(MintData { amount: 5 }));
        assert_eq!(serde_json::to_string(block.data()).unwrap(), data);

        // A SEND without a message hashes without one.
        let data = r#"{"amount":3,"fromAddress":"carol","toAddress":"alice"}"#;
        let raw = json!({
            "index": 2,
            "timestamp": 10,
            "data": { "toAddress": "alice", "fromAddress": "carol", "amount": 3 },
            "previousHash": "q",
            "type": "SEND",
            "hash": sorted_hash(2, "q", 10, data, "SEND")
        });
        let block: Block = serde_json::from_value(raw).unwrap();
        assert!(block.has_valid_hash());
        assert_eq!(block.to_address(), Some("alice"));

        let reparsed: Block = serde_json::from_str(&serde_json::to_string(&block).unwrap()).unwrap();
        assert!(reparsed.has_valid_hash());
        assert!(reparsed.data().get("message").is_none());

        // An empty genesis object stays empty.
        let raw = json!({
            "index": 0,
            "timestamp": 1,
            "data": {},
            "previousHash": "0",
            "type": "GENESIS",
            "hash": sorted_hash(0, "0", 1, "{}", "GENESIS")
        });
        let genesis: Block = serde_json::from_value(raw).unwrap();
        assert!(genesis.has_valid_hash());
        assert!(genesis.is_genesis());
    }

    #[test]
    fn test_genesis() {
        let genesis = Block::genesis(42);
        assert!(genesis.is_genesis());
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert!(genesis.signature.is_empty());
        assert!(genesis.has_valid_hash());
    }
}
