//! P2P networking module
//!
//! Provides the gossip mesh that replicates the ledger between nodes.
//!
//! # Features
//! - TCP peer connections with newline-delimited text messages
//! - Handshake with self and duplicate detection
//! - Peer-list exchange and automatic mesh growth
//! - Pluggable handlers for non-gossip message types
//! - Block replication and whole-chain resync

pub mod gossip;
pub mod message;
pub mod node;
pub mod peer;
pub mod server;
pub mod sync;

pub use gossip::{ConnectionState, Gossip, Session};
pub use message::{Message, ProtocolError, MAX_MESSAGE_SIZE, RESERVED_TYPES};
pub use node::{generate_node_id, Node, NodeConfig, NodeError, NodeStatus};
pub use peer::{
    ConnectionHandle, ConnectionId, ConnectionRecord, HandlerContext, HandlerResult,
    MessageHandler, Peer, PeerError, PeerRegistry,
};
pub use server::{connect_to_peer, spawn_connection, MessageCodec, Server};
pub use sync::{ChainSync, BLOCK_ADD, REQUEST_BLOCKCHAIN};
