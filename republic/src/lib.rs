// Copyright (c) 2024 Botho Foundation

//! Republic node library: per-user ledger nodes hosted behind a gateway.
//!
//! A [`node::Node`] owns one user's chain, keys and trust lines and persists
//! them through a [`storage::DocumentStore`]. The [`registry::NodeRegistry`]
//! caches live nodes and answers the gateway's routing questions; committed
//! blocks travel between nodes over a [`feed::BlockFeed`].

#![deny(clippy::print_stdout)]

pub mod config;
pub mod feed;
pub mod node;
pub mod oracle;
pub mod registry;
pub mod storage;

// Re-export commands module for CLI binary
pub mod commands;

pub use node::{Node, NodeError, NodeInfo, SendOutcome, TransferReceipt};
pub use registry::NodeRegistry;
