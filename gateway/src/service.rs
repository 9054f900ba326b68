// Copyright (c) 2024 Botho Foundation

//! Framed TCP connections, the user directory and message routing.
//!
//! Each connection gets a reader task and a writer task. The writer drains a
//! bounded queue of encoded frames; the reader decodes inbound frames and
//! either consumes them (HANDSHAKE, ANNOUNCE) or routes them:
//!
//! 1. to a locally hosted node, through [`LocalHost`];
//! 2. else to the connection the directory names for the target, forwarding
//!    the original bytes unchanged and never back to where they came from;
//! 3. else nowhere. Undeliverable messages are dropped.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{length_delimited, LengthDelimitedCodec};
use tracing::{debug, info, trace, warn};

use crate::config::{GatewayConfig, DEFAULT_NODE_ID};
use crate::directory::{ConnectionId, Directory};
use crate::error::{GatewayError, GatewayResult};
use crate::host::LocalHost;
use crate::messages::{ChainRequest, ChainResponse, Message};

/// Where a message addressed to a user should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Local,
    Forward(ConnectionId),
    Drop,
}

/// A live peer connection, as reported by [`Gateway::peers`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub connection: ConnectionId,
    /// Name from the peer's handshake, once received.
    pub node_id: Option<String>,
    pub addr: SocketAddr,
}

struct PeerConnection {
    addr: SocketAddr,
    node_id: Option<String>,
    tx: mpsc::Sender<Bytes>,
}

struct Inner {
    config: GatewayConfig,
    host: Arc<dyn LocalHost>,
    directory: Directory,
    connections: RwLock<HashMap<ConnectionId, PeerConnection>>,
    next_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to a running gateway.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

fn codec_builder(config: &GatewayConfig) -> length_delimited::Builder {
    let mut builder = LengthDelimitedCodec::builder();
    builder.max_frame_length(config.max_frame_bytes);
    builder
}

impl Gateway {
    pub fn new(config: GatewayConfig, host: Arc<dyn LocalHost>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                host,
                directory: Directory::new(),
                connections: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn directory(&self) -> &Directory {
        &self.inner.directory
    }

    /// Accept peer connections on `addr`; returns the bound address.
    pub async fn listen(&self, addr: SocketAddr) -> GatewayResult<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let gateway = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted peer connection");
                        gateway.attach(stream, peer);
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });
        self.track(handle);
        info!(%local, "gateway listening");
        Ok(local)
    }

    /// Dial a peer at `host:port`.
    pub async fn connect(&self, addr: &str) -> GatewayResult<ConnectionId> {
        let stream = timeout(self.inner.config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| GatewayError::Timeout)??;
        let peer = stream.peer_addr()?;
        info!(%peer, "connected to peer");
        Ok(self.attach(stream, peer))
    }

    /// Dial every configured bootstrap peer, returning how many succeeded.
    pub async fn connect_bootstrap(&self) -> usize {
        let mut connected = 0;
        for addr in &self.inner.config.bootstrap_peers {
            match self.connect(addr).await {
                Ok(_) => connected += 1,
                Err(e) => warn!(%addr, error = %e, "failed to dial bootstrap peer"),
            }
        }
        connected
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn attach(&self, stream: TcpStream, addr: SocketAddr) -> ConnectionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (read_half, write_half) = stream.into_split();
        let builder = codec_builder(&self.inner.config);
        let mut reader = builder.new_read(read_half);
        let mut writer = builder.new_write(write_half);
        let (tx, mut rx) = mpsc::channel::<Bytes>(self.inner.config.outbound_queue.max(1));

        self.inner.connections.write().insert(
            id,
            PeerConnection {
                addr,
                node_id: None,
                tx,
            },
        );

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = writer.send(frame).await {
                    debug!(conn = id, error = %e, "write failed, closing writer");
                    break;
                }
            }
        });

        let gateway = self.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(bytes) => gateway.handle_frame(id, bytes.freeze()).await,
                    Err(e) => {
                        debug!(conn = id, error = %e, "read failed, closing connection");
                        break;
                    }
                }
            }
            gateway.detach(id);
        });

        self.track(writer_task);
        self.track(reader_task);
        self.greet(id);
        id
    }

    /// Handshake plus one ANNOUNCE per hosted user.
    fn greet(&self, id: ConnectionId) {
        let mut greeting = vec![Message::handshake(self.inner.config.node_id.clone(), "")];
        greeting.extend(self.inner.host.hosted_users().into_iter().map(Message::announce));
        for message in greeting {
            if let Err(e) = self.queue_frame(id, &message) {
                warn!(conn = id, error = %e, "failed to queue greeting");
            }
        }
    }

    fn detach(&self, id: ConnectionId) {
        let removed = self.inner.connections.write().remove(&id);
        let users = self.inner.directory.remove_connection(id);
        if let Some(conn) = removed {
            info!(conn = id, addr = %conn.addr, dropped_users = users.len(), "peer disconnected");
        }
    }

    fn sender(&self, id: ConnectionId) -> GatewayResult<mpsc::Sender<Bytes>> {
        self.inner
            .connections
            .read()
            .get(&id)
            .map(|c| c.tx.clone())
            .ok_or(GatewayError::ChannelClosed)
    }

    fn queue_frame(&self, id: ConnectionId, message: &Message) -> GatewayResult<()> {
        self.queue_bytes(id, message.to_bytes()?)
    }

    /// Queue without waiting. A full queue drops the frame; reader tasks
    /// must never block on another connection's writer.
    fn queue_bytes(&self, id: ConnectionId, bytes: Bytes) -> GatewayResult<()> {
        match self.sender(id)?.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn = id, "outbound queue full, dropping frame");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(GatewayError::ChannelClosed),
        }
    }

    async fn handle_frame(&self, source: ConnectionId, bytes: Bytes) {
        let message = match Message::from_bytes(&bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!(conn = source, error = %e, "dropping undecodable frame");
                return;
            }
        };
        trace!(conn = source, kind = message.kind(), "received message");

        match message {
            Message::Handshake(handshake) => {
                info!(
                    conn = source,
                    node = %handshake.node_id,
                    version = %handshake.version,
                    "received handshake"
                );
                // A named peer is reachable under its name, but never displaces a
                // user already announced; the default name is shared by many peers.
                let named = !handshake.node_id.is_empty() && handshake.node_id != DEFAULT_NODE_ID;
                if named && !self.inner.directory.insert_if_absent(&handshake.node_id, source) {
                    debug!(conn = source, node = %handshake.node_id, "handshake name already in directory");
                }
                if let Some(conn) = self.inner.connections.write().get_mut(&source) {
                    conn.node_id = Some(handshake.node_id);
                }
            }
            Message::Announce(announce) => {
                debug!(conn = source, user = %announce.user_id, "user announced");
                self.inner.directory.insert(&announce.user_id, source);
            }
            other => match self.route(other, Some(source), Some(bytes)).await {
                Ok(()) => {}
                Err(GatewayError::Unroutable(user)) => {
                    debug!(conn = source, %user, "undeliverable message dropped");
                }
                Err(e) => warn!(conn = source, error = %e, "failed to handle message"),
            },
        }
    }

    /// Decide where a message for `target` goes. Never routes back to `source`.
    pub fn resolve_route(&self, target: &str, source: Option<ConnectionId>) -> Route {
        if self.inner.host.hosts(target) {
            return Route::Local;
        }
        match self.inner.directory.lookup(target) {
            Some(conn) if Some(conn) != source => Route::Forward(conn),
            _ => Route::Drop,
        }
    }

    async fn route(
        &self,
        message: Message,
        source: Option<ConnectionId>,
        raw: Option<Bytes>,
    ) -> GatewayResult<()> {
        let Some(target) = message.target().map(str::to_string) else {
            return Err(GatewayError::Unroutable(format!("untargeted {}", message.kind())));
        };

        match self.resolve_route(&target, source) {
            Route::Local => self.process_local(message, source).await,
            Route::Forward(conn) => {
                let bytes = match raw {
                    Some(bytes) => bytes,
                    None => message.to_bytes()?,
                };
                debug!(user = %target, kind = message.kind(), to = conn, "forwarding message");
                self.queue_bytes(conn, bytes)
            }
            Route::Drop => Err(GatewayError::Unroutable(target)),
        }
    }

    async fn process_local(&self, message: Message, source: Option<ConnectionId>) -> GatewayResult<()> {
        let host = &self.inner.host;
        match message {
            Message::NewBlock(new_block) => {
                let Some(user) = new_block.block.to_address().map(str::to_string) else {
                    return Ok(());
                };
                host.on_new_block(&user, new_block.block, new_block.public_key)
                    .await
            }
            Message::TransferRequest(request) => {
                let issuer = request.target_user().to_string();
                host.on_transfer_request(&issuer, request).await
            }
            Message::ChainRequest(ChainRequest { node_id, requester }) => {
                let chain = host
                    .chain_of(&node_id)
                    .await
                    .ok_or_else(|| GatewayError::Unroutable(node_id.clone()))?;
                match source {
                    Some(conn) => {
                        let response = Message::ChainResponse(ChainResponse {
                            node_id,
                            chain,
                            requester,
                        });
                        self.queue_frame(conn, &response)
                    }
                    None if host.hosts(&requester) => {
                        host.on_chain_response(&requester, &node_id, chain).await
                    }
                    None => Err(GatewayError::Unroutable(requester)),
                }
            }
            Message::ChainResponse(response) => {
                host.on_chain_response(&response.requester, &response.node_id, response.chain)
                    .await
            }
            Message::Handshake(_) | Message::Announce(_) => Ok(()),
        }
    }

    /// Route a locally originated message (TRANSFER_REQUEST, CHAIN_REQUEST, ...).
    pub async fn dispatch(&self, message: Message) -> GatewayResult<()> {
        self.route(message, None, None).await
    }

    /// Ask whoever hosts `node_id` for its chain on behalf of `requester`.
    pub async fn request_chain(&self, node_id: &str, requester: &str) -> GatewayResult<()> {
        self.dispatch(Message::ChainRequest(ChainRequest {
            node_id: node_id.to_string(),
            requester: requester.to_string(),
        }))
        .await
    }

    /// Queue `message` on every connection. Returns how many accepted it.
    ///
    /// Peers whose queue is full miss the message.
    pub fn broadcast(&self, message: &Message) -> usize {
        let bytes = match message.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to encode broadcast");
                return 0;
            }
        };
        let senders: Vec<(ConnectionId, mpsc::Sender<Bytes>)> = self
            .inner
            .connections
            .read()
            .iter()
            .map(|(id, c)| (*id, c.tx.clone()))
            .collect();

        let mut sent = 0;
        for (id, tx) in senders {
            match tx.try_send(bytes.clone()) {
                Ok(()) => sent += 1,
                Err(e) => warn!(conn = id, error = %e, "dropping broadcast frame"),
            }
        }
        sent
    }

    /// Tell every peer that `user_id` is hosted here.
    pub fn announce(&self, user_id: &str) -> usize {
        self.broadcast(&Message::announce(user_id))
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .inner
            .connections
            .read()
            .iter()
            .map(|(id, c)| PeerInfo {
                connection: *id,
                node_id: c.node_id.clone(),
                addr: c.addr,
            })
            .collect();
        peers.sort_by_key(|p| p.connection);
        peers
    }

    /// Stop accepting, close every connection and abort all tasks.
    pub fn shutdown(&self) {
        for handle in self.inner.tasks.lock().drain(..) {
            handle.abort();
        }
        self.inner.connections.write().clear();
        info!("gateway shut down");
    }
}

/// Deliver one message to the gateway at `addr` over a short-lived connection.
///
/// The write side is closed after sending and the connection is drained until
/// the peer hangs up, so the frame is never lost to a reset.
pub async fn send_once(addr: &str, message: &Message, config: &GatewayConfig) -> GatewayResult<()> {
    let stream = timeout(config.connect_timeout(), TcpStream::connect(addr))
        .await
        .map_err(|_| GatewayError::Timeout)??;
    let mut framed = codec_builder(config).new_framed(stream);
    framed.send(message.to_bytes()?).await?;
    SinkExt::<Bytes>::close(&mut framed).await?;

    let drain = async {
        while let Some(Ok(_)) = framed.next().await {}
    };
    timeout(config.connect_timeout(), drain)
        .await
        .map_err(|_| GatewayError::Timeout)?;
    debug!(%addr, kind = message.kind(), "sent one-shot message");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rp_chain::block::{Payload, SendData};
    use rp_chain::{Block, TransferRequest};

    #[derive(Default)]
    struct RecordingHost {
        users: Vec<String>,
        blocks: Mutex<Vec<(String, Block)>>,
    }

    impl RecordingHost {
        fn hosting(users: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                users: users.iter().map(|u| u.to_string()).collect(),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl LocalHost for RecordingHost {
        fn hosts(&self, user_id: &str) -> bool {
            self.users.iter().any(|u| u == user_id)
        }

        fn hosted_users(&self) -> Vec<String> {
            self.users.clone()
        }

        async fn on_new_block(
            &self,
            user_id: &str,
            block: Block,
            _origin_key: Option<String>,
        ) -> GatewayResult<()> {
            self.blocks.lock().push((user_id.to_string(), block));
            Ok(())
        }

        async fn on_transfer_request(&self, _: &str, _: TransferRequest) -> GatewayResult<()> {
            Ok(())
        }

        async fn chain_of(&self, _: &str) -> Option<Vec<Block>> {
            None
        }

        async fn on_chain_response(&self, _: &str, _: &str, _: Vec<Block>) -> GatewayResult<()> {
            Ok(())
        }
    }

    fn payment(to: &str) -> Block {
        Block::new(
            1,
            7,
            Payload::Send(SendData {
                amount: 9,
                to_address: to.to_string(),
                from_address: "alice".to_string(),
                message: String::new(),
            }),
            "p".to_string(),
        )
    }

    async fn eventually(check: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        check()
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[test]
    fn test_resolve_route() {
        let gateway = Gateway::new(GatewayConfig::default(), RecordingHost::hosting(&["alice"]));
        gateway.directory().insert("bob", 4);

        assert_eq!(gateway.resolve_route("alice", None), Route::Local);
        assert_eq!(gateway.resolve_route("bob", None), Route::Forward(4));
        assert_eq!(gateway.resolve_route("bob", Some(2)), Route::Forward(4));
        assert_eq!(gateway.resolve_route("bob", Some(4)), Route::Drop);
        assert_eq!(gateway.resolve_route("carol", None), Route::Drop);
    }

    #[tokio::test]
    async fn test_dispatch_unroutable() {
        let gateway = Gateway::new(GatewayConfig::default(), RecordingHost::hosting(&[]));
        let result = gateway
            .dispatch(Message::new_block(payment("nobody"), None))
            .await;
        assert!(matches!(result, Err(GatewayError::Unroutable(user)) if user == "nobody"));
    }

    #[tokio::test]
    async fn test_handshake_populates_directory_and_peers() {
        let a = Gateway::new(GatewayConfig::default(), RecordingHost::hosting(&["alice"]));
        let b = Gateway::new(GatewayConfig::default(), RecordingHost::hosting(&[]));
        let addr = b.listen(loopback()).await.unwrap();
        a.connect(&addr.to_string()).await.unwrap();

        assert!(eventually(|| b.directory().lookup("alice").is_some()).await);
        assert!(eventually(|| b.peers().iter().any(|p| p.node_id.as_deref() == Some("gateway"))).await);
        assert_eq!(a.peers().len(), 1);
        assert!(b.directory().lookup("gateway").is_none());
        assert!(a.directory().lookup("gateway").is_none());

        a.shutdown();
        assert!(eventually(|| b.directory().lookup("alice").is_none()).await);
        b.shutdown();
    }

    #[tokio::test]
    async fn test_relay_forwards_without_processing() {
        let relay_host = RecordingHost::hosting(&[]);
        let bob_host = RecordingHost::hosting(&["bob"]);
        let relay = Gateway::new(GatewayConfig::default(), relay_host.clone());
        let bob_gateway = Gateway::new(GatewayConfig::default(), bob_host.clone());

        let relay_addr = relay.listen(loopback()).await.unwrap();
        bob_gateway.connect(&relay_addr.to_string()).await.unwrap();
        assert!(eventually(|| relay.directory().lookup("bob").is_some()).await);

        let message = Message::new_block(payment("bob"), None);
        send_once(&relay_addr.to_string(), &message, &GatewayConfig::default())
            .await
            .unwrap();

        assert!(eventually(|| bob_host.blocks.lock().len() == 1).await);
        assert_eq!(bob_host.blocks.lock()[0].0, "bob");
        assert!(relay_host.blocks.lock().is_empty());

        relay.shutdown();
        bob_gateway.shutdown();
    }

    #[tokio::test]
    async fn test_forward_to_full_queue_drops_frame() {
        let config = GatewayConfig {
            outbound_queue: 1,
            ..GatewayConfig::default()
        };
        let gateway = Gateway::new(config, RecordingHost::hosting(&[]));
        let (tx, _rx) = mpsc::channel::<Bytes>(1);
        gateway.inner.connections.write().insert(
            9,
            PeerConnection {
                addr: loopback(),
                node_id: None,
                tx,
            },
        );
        gateway.directory().insert("bob", 9);

        for _ in 0..3 {
            let sent = timeout(
                Duration::from_secs(1),
                gateway.dispatch(Message::new_block(payment("bob"), None)),
            )
            .await
            .expect("forward must not wait on a full queue");
            assert!(sent.is_ok());
        }
    }

    #[tokio::test]
    async fn test_send_once_delivers_and_closes() {
        let host = RecordingHost::hosting(&["bob"]);
        let gateway = Gateway::new(GatewayConfig::default(), host.clone());
        let addr = gateway.listen(loopback()).await.unwrap();

        send_once(
            &addr.to_string(),
            &Message::new_block(payment("bob"), None),
            &GatewayConfig::default(),
        )
        .await
        .unwrap();

        assert!(eventually(|| host.blocks.lock().len() == 1).await);
        gateway.shutdown();
    }

    #[tokio::test]
    async fn test_handshake_name_never_displaces_user() {
        let hub = Gateway::new(GatewayConfig::default(), RecordingHost::hosting(&[]));
        let addr = hub.listen(loopback()).await.unwrap();

        let host = Gateway::new(GatewayConfig::default(), RecordingHost::hosting(&["alice"]));
        host.connect(&addr.to_string()).await.unwrap();
        assert!(eventually(|| hub.directory().lookup("alice").is_some()).await);
        let alice_conn = hub.directory().lookup("alice");

        let named = |name: &str| GatewayConfig {
            node_id: name.to_string(),
            ..GatewayConfig::default()
        };
        let impostor = Gateway::new(named("alice"), RecordingHost::hosting(&[]));
        impostor.connect(&addr.to_string()).await.unwrap();
        let relay = Gateway::new(named("relay-east"), RecordingHost::hosting(&[]));
        relay.connect(&addr.to_string()).await.unwrap();

        assert!(eventually(|| hub.directory().lookup("relay-east").is_some()).await);
        assert!(eventually(|| hub.peers().iter().any(|p| p.node_id.as_deref() == Some("alice"))).await);
        assert_eq!(hub.directory().lookup("alice"), alice_conn);

        for gateway in [hub, host, impostor, relay] {
            gateway.shutdown();
        }
    }
}
