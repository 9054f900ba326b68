// Copyright (c) 2024 Botho Foundation

//! Block propagation between nodes.
//!
//! A [`BlockFeed`] carries every block a node commits to the other nodes that
//! may care about it. Subscribers pass the timestamp of their last persisted
//! update and only see events received at or after it, so a cold start does
//! not replay the whole feed.

use async_trait::async_trait;
use parking_lot::Mutex;
use rp_chain::block::now_millis;
use rp_chain::Block;
use rp_gateway::{send_once, Gateway, GatewayConfig, Message};
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Events kept for late subscribers.
const HISTORY_LIMIT: usize = 4096;
const CHANNEL_CAPACITY: usize = 1024;

/// One block as seen by the feed.
#[derive(Debug, Clone)]
pub struct FeedEvent {
    pub block: Block,
    /// Public key of the node that committed the block.
    pub origin_key: Option<String>,
    /// When the feed accepted the block, in milliseconds.
    pub received_at: u64,
}

#[async_trait]
pub trait BlockFeed: Send + Sync + 'static {
    /// Publish a committed block. Delivery is best effort.
    async fn broadcast(&self, block: Block, origin_key: Option<String>);

    /// Events received at or after `since`, followed by live events.
    fn subscribe(&self, since: u64) -> FeedSubscription;
}

/// Stream of [`FeedEvent`]s for one subscriber.
pub struct FeedSubscription {
    backlog: VecDeque<FeedEvent>,
    rx: broadcast::Receiver<FeedEvent>,
}

impl FeedSubscription {
    /// Next event, or `None` once the feed is gone.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "feed subscriber lagged, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct FeedState {
    history: VecDeque<FeedEvent>,
    tx: broadcast::Sender<FeedEvent>,
}

/// In-process feed with bounded history.
pub struct MemoryFeed {
    state: Mutex<FeedState>,
}

impl Default for MemoryFeed {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(FeedState {
                history: VecDeque::new(),
                tx,
            }),
        }
    }
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(&self, block: Block, origin_key: Option<String>) {
        let event = FeedEvent {
            block,
            origin_key,
            received_at: now_millis(),
        };
        let mut state = self.state.lock();
        if state.history.len() == HISTORY_LIMIT {
            state.history.pop_front();
        }
        state.history.push_back(event.clone());
        // No receivers is fine; history still holds the event.
        let _ = state.tx.send(event);
    }

    fn open(&self, since: u64) -> FeedSubscription {
        // Backlog and receiver are taken under one lock so no event falls
        // between them.
        let state = self.state.lock();
        let backlog = state
            .history
            .iter()
            .filter(|event| event.received_at >= since)
            .cloned()
            .collect();
        FeedSubscription {
            backlog,
            rx: state.tx.subscribe(),
        }
    }
}

#[async_trait]
impl BlockFeed for MemoryFeed {
    async fn broadcast(&self, block: Block, origin_key: Option<String>) {
        self.publish(block, origin_key);
    }

    fn subscribe(&self, since: u64) -> FeedSubscription {
        self.open(since)
    }
}

/// Feed for a long-running gateway process.
///
/// Local nodes hear each other through the in-process feed; blocks addressed
/// to users hosted elsewhere are also sent as NEW_BLOCK to every peer.
#[derive(Default)]
pub struct GatewayFeed {
    local: MemoryFeed,
    gateway: OnceLock<Gateway>,
}

impl GatewayFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect the feed to its gateway. Only the first call has an effect.
    pub fn attach(&self, gateway: Gateway) {
        if self.gateway.set(gateway).is_err() {
            warn!("feed already attached to a gateway");
        }
    }
}

#[async_trait]
impl BlockFeed for GatewayFeed {
    async fn broadcast(&self, block: Block, origin_key: Option<String>) {
        self.local.publish(block.clone(), origin_key.clone());

        let Some(gateway) = self.gateway.get() else {
            return;
        };
        let Some(target) = block.to_address() else {
            return;
        };
        let message = Message::new_block(block.clone(), origin_key);
        let sent = gateway.broadcast(&message);
        debug!(index = block.index, user = %target, peers = sent, "block sent to peers");
    }

    fn subscribe(&self, since: u64) -> FeedSubscription {
        self.local.open(since)
    }
}

/// Feed for one-shot commands: delivers addressed blocks straight to the
/// bootstrap peers over short-lived connections.
pub struct DirectFeed {
    local: MemoryFeed,
    config: Arc<GatewayConfig>,
}

impl DirectFeed {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            local: MemoryFeed::new(),
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl BlockFeed for DirectFeed {
    async fn broadcast(&self, block: Block, origin_key: Option<String>) {
        self.local.publish(block.clone(), origin_key.clone());

        if block.to_address().is_none() {
            return;
        }
        let message = Message::new_block(block, origin_key);
        for peer in &self.config.bootstrap_peers {
            if let Err(e) = send_once(peer, &message, &self.config).await {
                warn!(%peer, error = %e, "failed to deliver block");
            }
        }
    }

    fn subscribe(&self, since: u64) -> FeedSubscription {
        self.local.open(since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(index: u64) -> Block {
        Block::genesis(index)
    }

    #[tokio::test]
    async fn test_subscribe_replays_history_since() {
        let feed = MemoryFeed::new();
        feed.broadcast(block(1), None).await;
        let cutoff = now_millis() + 1;

        let mut all = feed.subscribe(0);
        assert_eq!(all.next().await.map(|e| e.block.timestamp), Some(1));

        // Nothing before the cutoff is replayed.
        let mut recent = feed.subscribe(cutoff);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        feed.broadcast(block(2), Some("key".to_string())).await;
        let event = recent.next().await.unwrap();
        assert_eq!(event.block.timestamp, 2);
        assert_eq!(event.origin_key.as_deref(), Some("key"));
    }

    #[tokio::test]
    async fn test_live_events_reach_every_subscriber() {
        let feed = MemoryFeed::new();
        let mut a = feed.subscribe(u64::MAX);
        let mut b = feed.subscribe(u64::MAX);
        feed.broadcast(block(7), None).await;
        assert_eq!(a.next().await.unwrap().block.timestamp, 7);
        assert_eq!(b.next().await.unwrap().block.timestamp, 7);
    }

    #[tokio::test]
    async fn test_unattached_gateway_feed_stays_local() {
        let feed = GatewayFeed::new();
        let mut sub = feed.subscribe(0);
        feed.broadcast(block(3), None).await;
        assert_eq!(sub.next().await.unwrap().block.timestamp, 3);
    }
}
