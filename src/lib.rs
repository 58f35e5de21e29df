//! Mesh-Ledger: a gossip-replicated, hash-linked ledger in Rust
//!
//! This crate provides:
//! - An append-only chain of blocks, each linked to its predecessor by
//!   SHA-256 hash, with a fixed little-endian wire encoding
//! - A TCP gossip mesh: handshake, peer-list exchange, and automatic
//!   connection to newly discovered peers
//! - Block replication (`BLOCK-ADD`) and whole-chain resync
//!   (`REQUEST-BLOCKCHAIN`) on top of the mesh
//! - secp256k1 key pairs for signing document hashes into the ledger
//!
//! # Example
//!
//! ```rust,no_run
//! use mesh_ledger::network::{Node, NodeConfig};
//!
//! # async fn run() -> Result<(), mesh_ledger::network::NodeError> {
//! let node = Node::new(NodeConfig::default()).await?;
//! node.listen().await?;
//! node.start().await?;
//!
//! // Record a document hash and push it to every connected peer
//! let index = node.add_record(chrono::Utc::now().timestamp(), b"hello".to_vec()).await?;
//! node.cast(index).await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod core;
pub mod crypto;
pub mod network;

// Re-export commonly used types
pub use core::{Block, Chain, ChainError, Ledger};
pub use crypto::{sha256, Digest};
pub use network::{Message, Node, NodeConfig, ProtocolError};
