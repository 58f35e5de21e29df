//! Peer and connection registry
//!
//! Tracks resolved peers by id, every open connection (resolved or not),
//! and the table of handlers for non-gossip message types. Each table has
//! its own lock; callers get snapshots and do their socket work after the
//! lock is released.

use crate::network::message::{Message, ProtocolError, RESERVED_TYPES};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Message type {0} is reserved by the gossip protocol")]
    ReservedMessageType(String),
}

/// Identifies one socket for the lifetime of the process
pub type ConnectionId = u64;

/// Cloneable handle for sending messages to a connection.
///
/// The socket itself stays with its connection task; this only feeds the
/// task's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    tx: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            id,
            local_addr,
            remote_addr,
            tx,
        }
    }

    pub fn send(&self, msg: Message) -> Result<(), PeerError> {
        self.tx.send(msg).map_err(|_| PeerError::Disconnected)
    }
}

/// A peer whose handshake completed
#[derive(Debug, Clone)]
pub struct Peer {
    /// Self-asserted peer id
    pub id: String,
    /// Address the peer listens on
    pub address: String,
    /// Connection the handshake happened on
    pub connection: ConnectionHandle,
}

/// An open connection and what we know about the peer behind it
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub connection: ConnectionHandle,
    /// `None` until the handshake resolves the peer
    pub peer_id: Option<String>,
    pub peer_address: Option<String>,
}

impl ConnectionRecord {
    pub fn unresolved(connection: ConnectionHandle) -> Self {
        Self {
            connection,
            peer_id: None,
            peer_address: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.peer_id.is_some()
    }
}

/// Context handed to extension message handlers
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Connection the message arrived on
    pub connection: ConnectionHandle,
    /// Sender's peer id, if the handshake already happened
    pub peer_id: Option<String>,
}

/// Replies produced by a handler, sent back on the originating connection
pub type HandlerResult = Result<Vec<Message>, ProtocolError>;

/// Handler for one extension message type; receives the message arguments
pub type MessageHandler =
    Arc<dyn Fn(HandlerContext, Vec<String>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Registry of peers, connections and message handlers
#[derive(Default)]
pub struct PeerRegistry {
    /// Resolved peers by id
    peers: RwLock<HashMap<String, Peer>>,
    /// Open connections by id
    connections: RwLock<HashMap<ConnectionId, ConnectionRecord>>,
    /// Extension handlers by message type
    handlers: RwLock<HashMap<String, MessageHandler>>,
    next_connection_id: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a newly accepted or dialed socket
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Peers
    // =========================================================================

    /// Insert or overwrite a peer
    pub async fn register_peer(&self, id: &str, peer: Peer) {
        self.peers.write().await.insert(id.to_string(), peer);
        log::info!("Peer connected: {}", id);
    }

    /// Admit a peer after a handshake.
    ///
    /// The self and duplicate checks and the insert happen under one write
    /// lock, so two concurrent handshakes for the same id cannot both win.
    pub async fn admit_peer(&self, self_id: &str, peer: Peer) -> Result<(), ProtocolError> {
        if peer.id == self_id {
            return Err(ProtocolError::SelfPeer(peer.id));
        }

        let mut peers = self.peers.write().await;
        if peers.contains_key(&peer.id) {
            return Err(ProtocolError::DuplicatePeer(peer.id));
        }
        log::info!("Peer connected: {} ({})", peer.id, peer.address);
        peers.insert(peer.id.clone(), peer);
        Ok(())
    }

    pub async fn forget_peer(&self, id: &str) -> Option<Peer> {
        let removed = self.peers.write().await.remove(id);
        if removed.is_some() {
            log::info!("Peer disconnected: {}", id);
        }
        removed
    }

    /// Remove a peer only if it is bound to `connection`
    pub async fn forget_peer_owned_by(&self, id: &str, connection: ConnectionId) -> Option<Peer> {
        let mut peers = self.peers.write().await;
        if peers.get(id).map(|p| p.connection.id) != Some(connection) {
            return None;
        }
        log::info!("Peer disconnected: {}", id);
        peers.remove(id)
    }

    pub async fn lookup_peer(&self, id: &str) -> Option<Peer> {
        self.peers.read().await.get(id).cloned()
    }

    /// Snapshot of all peers, sorted by id
    pub async fn list_peers(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.read().await.values().cloned().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    // =========================================================================
    // Connections
    // =========================================================================

    pub async fn track_connection(&self, record: ConnectionRecord) {
        let id = record.connection.id;
        log::debug!("Tracking connection {} ({})", id, record.connection.remote_addr);
        self.connections.write().await.insert(id, record);
    }

    pub async fn untrack_connection(&self, id: ConnectionId) -> Option<ConnectionRecord> {
        self.connections.write().await.remove(&id)
    }

    /// Fill in the peer identity of a tracked connection
    pub async fn resolve_connection(&self, id: ConnectionId, peer_id: &str, peer_address: &str) {
        if let Some(record) = self.connections.write().await.get_mut(&id) {
            record.peer_id = Some(peer_id.to_string());
            record.peer_address = Some(peer_address.to_string());
        }
    }

    /// Snapshot of all open connections, in the order they were opened
    pub async fn list_connections(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<ConnectionRecord> =
            self.connections.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.connection.id);
        records
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Queue a message on every open connection, resolved or not
    pub async fn broadcast(&self, msg: &Message) -> usize {
        let records = self.list_connections().await;
        let mut sent = 0;
        for record in records {
            match record.connection.send(msg.clone()) {
                Ok(()) => sent += 1,
                Err(e) => log::warn!(
                    "Failed to send to {}: {}",
                    record.connection.remote_addr,
                    e
                ),
            }
        }
        sent
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    pub async fn register_handler(
        &self,
        message_type: &str,
        handler: MessageHandler,
    ) -> Result<(), PeerError> {
        if RESERVED_TYPES.contains(&message_type) {
            return Err(PeerError::ReservedMessageType(message_type.to_string()));
        }
        self.handlers
            .write()
            .await
            .insert(message_type.to_string(), handler);
        Ok(())
    }

    pub async fn lookup_handler(&self, message_type: &str) -> Option<MessageHandler> {
        self.handlers.read().await.get(message_type).cloned()
    }
}
