// Copyright (c) 2024 Botho Foundation

//! Peer network layer for republic gateways.
//!
//! A gateway hosts any number of user nodes behind one TCP endpoint. Peers
//! learn which gateway hosts which user from HANDSHAKE and ANNOUNCE messages;
//! messages for users hosted elsewhere are relayed one hop to the connection
//! the directory names.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                       Gateway                         │
//! ├───────────────────────────────────────────────────────┤
//! │  ┌────────────┐  ┌────────────┐  ┌─────────────────┐  │
//! │  │ LocalHost  │  │ Directory  │  │ Connections     │  │
//! │  │ (nodes)    │  │ (user→conn)│  │ (framed TCP)    │  │
//! │  └────────────┘  └────────────┘  └─────────────────┘  │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Message Types
//!
//! - `HANDSHAKE`, `ANNOUNCE`: consumed by the gateway to build the directory
//! - `NEW_BLOCK`: routed by the block's `toAddress`
//! - `TRANSFER_REQUEST`: routed to the asset issuer
//! - `CHAIN_REQUEST` / `CHAIN_RESPONSE`: routed to the chain owner / requester

pub mod config;
pub mod directory;
pub mod error;
pub mod host;
pub mod messages;
pub mod service;

pub use config::GatewayConfig;
pub use directory::{ConnectionId, Directory};
pub use error::{GatewayError, GatewayResult};
pub use host::LocalHost;
pub use messages::{Message, PROTOCOL_VERSION};
pub use service::{send_once, Gateway, PeerInfo, Route};
