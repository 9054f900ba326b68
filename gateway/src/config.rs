// Copyright (c) 2024 Botho Foundation

//! Configuration for the gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Handshake name used when none is configured. Never entered in the directory.
pub const DEFAULT_NODE_ID: &str = "gateway";

/// Configuration for a gateway process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Name this gateway uses in its handshake
    pub node_id: String,

    /// Port to listen on for peer connections (0 picks a free port)
    pub listen_port: u16,

    /// Peers to dial on startup (`host:port`)
    pub bootstrap_peers: Vec<String>,

    /// Largest accepted frame, in bytes
    pub max_frame_bytes: usize,

    /// Timeout for outbound connection attempts (seconds)
    pub connect_timeout_secs: u64,

    /// Outbound frames buffered per connection before new ones are dropped
    pub outbound_queue: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            node_id: DEFAULT_NODE_ID.to_string(),
            listen_port: 6001,
            bootstrap_peers: Vec::new(),
            max_frame_bytes: 8 * 1024 * 1024,
            connect_timeout_secs: 5,
            outbound_queue: 256,
        }
    }
}

impl GatewayConfig {
    /// Create a new config with the given listen port.
    pub fn with_port(port: u16) -> Self {
        Self {
            listen_port: port,
            ..Default::default()
        }
    }

    /// Get the connect timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
