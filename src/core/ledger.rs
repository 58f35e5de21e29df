//! Shared, lock-guarded ledger
//!
//! Wraps a [`Chain`] in a single reader/writer lock. Appends and
//! replacements take the lock exclusively; every read takes it shared, so
//! no caller ever observes a chain mid-append.

use crate::core::block::Block;
use crate::core::blockchain::{Chain, ChainError, ChainStats};
use tokio::sync::RwLock;

/// Outcome of feeding a replicated block into the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    /// A genesis block replaced the whole local chain
    Replaced,
    /// The block extended the local chain at this index
    Appended(u64),
    /// The block does not link but sits at or past our tip: we are behind
    Behind { local_next: u64, remote_index: u64 },
    /// The block is older than our tip and does not link; discarded
    Stale(ChainError),
}

/// The node's ledger
#[derive(Debug)]
pub struct Ledger {
    chain: RwLock<Chain>,
}

impl Ledger {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain: RwLock::new(chain),
        }
    }

    /// Create a ledger holding a fresh genesis block
    pub fn genesis(timestamp: i64, data: Vec<u8>) -> Self {
        Self::new(Chain::genesis(timestamp, data))
    }

    pub async fn append(&self, block: Block) -> Result<(), ChainError> {
        self.chain.write().await.append(block)
    }

    /// Append a record built on top of the current tip
    pub async fn append_data(&self, timestamp: i64, data: Vec<u8>) -> Result<u64, ChainError> {
        self.chain.write().await.append_data(timestamp, data)
    }

    pub async fn get_block(&self, index: u64) -> Result<Block, ChainError> {
        self.chain.read().await.get_block(index).cloned()
    }

    pub async fn verify_consistency(&self) -> bool {
        self.chain.read().await.verify_consistency()
    }

    /// Point-in-time copy of every block, in chain order
    pub async fn snapshot(&self) -> Vec<Block> {
        self.chain.read().await.blocks().to_vec()
    }

    /// Point-in-time copy of the whole chain
    pub async fn chain(&self) -> Chain {
        self.chain.read().await.clone()
    }

    pub async fn stats(&self) -> ChainStats {
        self.chain.read().await.stats()
    }

    /// Apply a block received from a peer.
    ///
    /// A genesis block always wins (last writer wins, no arbitration between
    /// competing genesis blocks). Otherwise the block is appended when it
    /// links to the tip; the decision and the mutation happen under one
    /// exclusive lock.
    pub async fn receive(&self, block: Block) -> Receipt {
        let mut chain = self.chain.write().await;

        if block.is_genesis() {
            *chain = Chain::from_genesis(block);
            return Receipt::Replaced;
        }

        let index = block.index;
        match chain.append(block) {
            Ok(()) => Receipt::Appended(index),
            Err(_) if index >= chain.next_index() => Receipt::Behind {
                local_next: chain.next_index(),
                remote_index: index,
            },
            Err(e) => Receipt::Stale(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{sha256, Digest};

    #[tokio::test]
    async fn test_append_and_lookup() {
        let ledger = Ledger::genesis(100, vec![]);
        let index = ledger.append_data(101, b"record".to_vec()).await.unwrap();
        assert_eq!(index, 1);

        let block = ledger.get_block(1).await.unwrap();
        assert_eq!(block.data, b"record");
        assert_eq!(block.previous_hash, sha256(&[]));
        assert!(ledger.verify_consistency().await);

        assert_eq!(
            ledger.get_block(2).await.unwrap_err(),
            ChainError::BlockNotFound(2)
        );
    }

    #[tokio::test]
    async fn test_rejected_append_leaves_chain_unchanged() {
        let ledger = Ledger::genesis(100, vec![]);
        let before = ledger.chain().await;

        let bad = Block::new(1, Digest::ZERO, 5, vec![1]);
        assert!(ledger.append(bad).await.is_err());
        assert_eq!(ledger.chain().await, before);
    }

    #[tokio::test]
    async fn test_receive_genesis_replaces_history() {
        let ledger = Ledger::genesis(100, vec![]);
        ledger.append_data(101, vec![1]).await.unwrap();
        ledger.append_data(102, vec![2]).await.unwrap();

        let foreign = Block::genesis(50, b"other network".to_vec());
        assert_eq!(ledger.receive(foreign.clone()).await, Receipt::Replaced);

        let chain = ledger.chain().await;
        assert_eq!(chain.blocks(), &[foreign.clone()]);
        assert_eq!(chain.next_index(), 1);
        assert_eq!(chain.last_hash(), foreign.hash());
    }

    #[tokio::test]
    async fn test_receive_linking_block_appends() {
        let ledger = Ledger::genesis(100, vec![]);
        let block = Block::new(1, sha256(&[]), 101, vec![7]);

        assert_eq!(ledger.receive(block).await, Receipt::Appended(1));
        assert_eq!(ledger.stats().await.next_index, 2);
    }

    #[tokio::test]
    async fn test_receive_ahead_block_reports_behind() {
        let ledger = Ledger::genesis(100, vec![]);

        let far = Block::new(5, sha256(b"x"), 101, vec![7]);
        assert_eq!(
            ledger.receive(far).await,
            Receipt::Behind {
                local_next: 1,
                remote_index: 5
            }
        );

        // Right index, wrong link: also behind (the peer has a different history)
        let forked = Block::new(1, sha256(b"fork"), 101, vec![7]);
        assert!(matches!(
            ledger.receive(forked).await,
            Receipt::Behind { .. }
        ));
        assert_eq!(ledger.stats().await.total_blocks, 1);
    }

    #[tokio::test]
    async fn test_receive_stale_block_discarded() {
        let ledger = Ledger::genesis(100, vec![]);
        ledger.append_data(101, vec![1]).await.unwrap();
        ledger.append_data(102, vec![2]).await.unwrap();
        let before = ledger.chain().await;

        let stale = Block::new(1, sha256(b"old"), 90, vec![1]);
        assert!(matches!(ledger.receive(stale).await, Receipt::Stale(_)));
        assert_eq!(ledger.chain().await, before);
    }

    #[tokio::test]
    async fn test_snapshot_matches_chain() {
        let ledger = Ledger::genesis(100, vec![]);
        ledger.append_data(101, vec![1]).await.unwrap();

        let snapshot = ledger.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot, ledger.chain().await.blocks());
    }
}
