// Copyright (c) 2024 Botho Foundation

//! The seam between the gateway and the nodes it hosts.

use async_trait::async_trait;
use rp_chain::{Block, TransferRequest};

use crate::error::GatewayResult;

/// Nodes hosted in this process, as seen by the gateway.
///
/// The gateway only asks whether a user is hosted and hands routed messages
/// over; it never touches a node's chain directly.
#[async_trait]
pub trait LocalHost: Send + Sync + 'static {
    /// Whether a node for `user_id` lives in this process.
    fn hosts(&self, user_id: &str) -> bool;

    /// Users to announce to newly connected peers.
    fn hosted_users(&self) -> Vec<String>;

    /// A NEW_BLOCK addressed to `user_id`.
    async fn on_new_block(
        &self,
        user_id: &str,
        block: Block,
        origin_key: Option<String>,
    ) -> GatewayResult<()>;

    /// A TRANSFER_REQUEST for which `user_id` is the issuer.
    async fn on_transfer_request(&self, user_id: &str, request: TransferRequest)
        -> GatewayResult<()>;

    /// Current chain of `user_id`, if hosted.
    async fn chain_of(&self, user_id: &str) -> Option<Vec<Block>>;

    /// A CHAIN_RESPONSE for `requester`'s external chain cache.
    async fn on_chain_response(
        &self,
        requester: &str,
        node_id: &str,
        chain: Vec<Block>,
    ) -> GatewayResult<()>;
}
