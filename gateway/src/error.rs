// Copyright (c) 2024 Botho Foundation

//! Error types for the gateway.

use displaydoc::Display;
use thiserror::Error;

/// Errors that can occur while exchanging or routing peer messages.
#[derive(Debug, Display, Error)]
pub enum GatewayError {
    /// I/O error: {0}
    Io(#[from] std::io::Error),

    /// Failed to encode or decode message: {0}
    Codec(String),

    /// No route to user {0}
    Unroutable(String),

    /// Local host rejected message: {0}
    Host(String),

    /// Channel closed
    ChannelClosed,

    /// Timeout waiting for peer
    Timeout,
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Codec(err.to_string())
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
