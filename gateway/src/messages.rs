// Copyright (c) 2024 Botho Foundation

//! Peer wire protocol.
//!
//! Every frame carries one JSON object of the form
//! `{"type": "<MESSAGE_TYPE>", "payload": {...}}`. Frames are length-prefixed
//! by the transport, so messages themselves carry no delimiter.

use bytes::Bytes;
use rp_chain::{Block, TransferRequest};
use serde::{Deserialize, Serialize};

use crate::error::GatewayResult;

/// Protocol version sent in handshakes.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// First message sent on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub node_id: String,
    pub version: String,
    #[serde(default)]
    pub public_key: String,
}

/// Gossip that the sending gateway hosts `user_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announce {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRequest {
    /// Owner of the requested chain.
    pub node_id: String,
    /// User whose cache should receive the answer.
    pub requester: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainResponse {
    pub node_id: String,
    pub chain: Vec<Block>,
    #[serde(default)]
    pub requester: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBlock {
    pub block: Block,
    /// Public key of the chain the block was appended to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Handshake(Handshake),
    Announce(Announce),
    ChainRequest(ChainRequest),
    ChainResponse(ChainResponse),
    NewBlock(NewBlock),
    TransferRequest(TransferRequest),
}

impl Message {
    pub fn handshake(node_id: impl Into<String>, public_key: impl Into<String>) -> Self {
        Message::Handshake(Handshake {
            node_id: node_id.into(),
            version: PROTOCOL_VERSION.to_string(),
            public_key: public_key.into(),
        })
    }

    pub fn announce(user_id: impl Into<String>) -> Self {
        Message::Announce(Announce {
            user_id: user_id.into(),
        })
    }

    pub fn new_block(block: Block, public_key: Option<String>) -> Self {
        Message::NewBlock(NewBlock { block, public_key })
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Handshake(_) => "HANDSHAKE",
            Message::Announce(_) => "ANNOUNCE",
            Message::ChainRequest(_) => "CHAIN_REQUEST",
            Message::ChainResponse(_) => "CHAIN_RESPONSE",
            Message::NewBlock(_) => "NEW_BLOCK",
            Message::TransferRequest(_) => "TRANSFER_REQUEST",
        }
    }

    /// The user a routed message is addressed to.
    ///
    /// Handshakes and announcements are consumed by the gateway itself and
    /// have no target. Blocks without a recipient (MINT, CONTRACT, ...) have
    /// none either.
    pub fn target(&self) -> Option<&str> {
        match self {
            Message::Handshake(_) | Message::Announce(_) => None,
            Message::ChainRequest(req) => Some(&req.node_id),
            Message::ChainResponse(resp) => Some(&resp.requester),
            Message::NewBlock(nb) => nb.block.to_address(),
            Message::TransferRequest(req) => Some(req.target_user()),
        }
    }

    pub fn to_bytes(&self) -> GatewayResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> GatewayResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
