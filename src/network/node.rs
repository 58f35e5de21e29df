//! Ledger node
//!
//! The orchestrator that owns one peer registry, one ledger, and the gossip
//! engine bound to them, and exposes the operator-facing operations.

use crate::core::{Block, ChainError, ChainStats, Ledger};
use crate::crypto::Digest;
use crate::network::gossip::Gossip;
use crate::network::message::{Message, ProtocolError};
use crate::network::peer::{ConnectionHandle, ConnectionRecord, Peer, PeerError, PeerRegistry};
use crate::network::server::Server;
use crate::network::sync::{self, ChainSync};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Alphabet for generated node ids
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ-_";

/// Length of generated node ids
pub const NODE_ID_LEN: usize = 8;

/// Random node id, e.g. `x3K_9a-Q`
pub fn generate_node_id() -> String {
    let mut rng = rand::thread_rng();
    (0..NODE_ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Node is not listening")]
    NotListening,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Self-asserted id announced in handshakes
    pub node_id: String,
    /// Host to listen on and advertise
    pub host: String,
    /// Port to listen on; 0 picks a free one
    pub port: u16,
    /// Node to join after listening
    pub bootstrap_peer: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: generate_node_id(),
            host: "127.0.0.1".to_string(),
            port: 0,
            bootstrap_peer: None,
        }
    }
}

/// Snapshot of a node's state
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub id: String,
    pub address: Option<String>,
    pub next_index: u64,
    pub total_blocks: usize,
    pub last_hash: Digest,
    pub peers: usize,
    pub connections: usize,
}

/// A ledger node
pub struct Node {
    pub config: NodeConfig,
    ledger: Arc<Ledger>,
    registry: Arc<PeerRegistry>,
    gossip: Arc<Gossip>,
    /// Bound listener, until `start` hands it to the acceptor task
    server: Mutex<Option<Server>>,
}

impl Node {
    /// Create a node holding a fresh genesis block with an empty payload
    pub async fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let ledger = Ledger::genesis(chrono::Utc::now().timestamp(), Vec::new());
        Self::with_ledger(config, ledger).await
    }

    /// Create a node around an existing ledger
    pub async fn with_ledger(config: NodeConfig, ledger: Ledger) -> Result<Self, NodeError> {
        let ledger = Arc::new(ledger);
        let registry = Arc::new(PeerRegistry::new());
        let gossip = Arc::new(Gossip::new(config.node_id.clone(), registry.clone()));

        Arc::new(ChainSync::new(ledger.clone()))
            .install(&registry)
            .await?;

        log::info!("Node {} created", config.node_id);

        Ok(Self {
            config,
            ledger,
            registry,
            gossip,
            server: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.node_id
    }

    /// Advertised `host:port`, once listening
    pub fn address(&self) -> Option<String> {
        self.gossip.node_addr().map(str::to_string)
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Bind the listener and fix the advertised address
    pub async fn listen(&self) -> Result<SocketAddr, NodeError> {
        let bind_addr = format!("{}:{}", self.config.host, self.config.port);
        let server = Server::bind(&bind_addr)
            .await
            .map_err(|source| NodeError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local = server.local_addr();

        let advertised = format!("{}:{}", self.config.host, local.port());
        if !self.gossip.set_node_addr(advertised.clone()) {
            log::warn!("Node {} is already listening", self.id());
        }
        *self.server.lock().await = Some(server);

        log::info!("Node {} listening on {}", self.id(), advertised);
        Ok(local)
    }

    /// Spawn the acceptor task
    pub async fn start(&self) -> Result<JoinHandle<()>, NodeError> {
        let server = self.server.lock().await.take().ok_or(NodeError::NotListening)?;
        Ok(tokio::spawn(server.run(self.gossip.clone())))
    }

    /// Join the network of the node at `addr`
    pub async fn join(&self, addr: &str) -> Result<ConnectionHandle, NodeError> {
        if self.gossip.node_addr().is_none() {
            return Err(NodeError::NotListening);
        }
        log::info!("Joining network via {}", addr);
        Ok(self.gossip.join(addr).await?)
    }

    /// Append a record to the local chain. Not broadcast; see [`Node::cast`].
    pub async fn add_record(&self, timestamp: i64, payload: Vec<u8>) -> Result<u64, NodeError> {
        let index = self.ledger.append_data(timestamp, payload).await?;
        log::info!("Added block {}", index);
        Ok(index)
    }

    pub async fn get_record(&self, index: u64) -> Result<Block, NodeError> {
        Ok(self.ledger.get_block(index).await?)
    }

    /// Queue `msg` on every open connection
    pub async fn broadcast(&self, msg: Message) -> usize {
        let sent = self.registry.broadcast(&msg).await;
        log::debug!("Broadcast {} to {} connection(s)", msg.type_name(), sent);
        sent
    }

    /// Broadcast one block as `BLOCK-ADD`
    pub async fn cast(&self, index: u64) -> Result<usize, NodeError> {
        let block = self.ledger.get_block(index).await?;
        Ok(self.broadcast(sync::block_add(&block)).await)
    }

    /// Ask every connection for its whole chain
    pub async fn request_blockchain(&self) -> usize {
        self.broadcast(sync::request_blockchain()).await
    }

    pub async fn verify_consistency(&self) -> bool {
        self.ledger.verify_consistency().await
    }

    pub async fn peers(&self) -> Vec<Peer> {
        self.registry.list_peers().await
    }

    pub async fn connections(&self) -> Vec<ConnectionRecord> {
        self.registry.list_connections().await
    }

    pub async fn blocks(&self) -> Vec<Block> {
        self.ledger.snapshot().await
    }

    pub async fn stats(&self) -> ChainStats {
        self.ledger.stats().await
    }

    pub async fn status(&self) -> NodeStatus {
        let stats = self.ledger.stats().await;
        NodeStatus {
            id: self.id().to_string(),
            address: self.address(),
            next_index: stats.next_index,
            total_blocks: stats.total_blocks,
            last_hash: stats.last_hash,
            peers: self.registry.peer_count().await,
            connections: self.registry.connection_count().await,
        }
    }
}
