//! Hash-linked chain of blocks
//!
//! `Chain` is the plain data structure; all mutation goes through
//! [`Chain::append`] so the link invariants hold after every call.

use crate::core::block::Block;
use crate::crypto::Digest;
use thiserror::Error;

/// Chain-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Invalid block: expected index {expected}, got {got}")]
    IndexMismatch { expected: u64, got: u64 },
    #[error("Invalid block: previous hash {got} does not match last hash {expected}")]
    PreviousHashMismatch { expected: Digest, got: Digest },
    #[error("Block not found: {0}")]
    BlockNotFound(u64),
}

impl ChainError {
    /// True for append rule violations, false for lookups
    pub fn is_validation(&self) -> bool {
        !matches!(self, ChainError::BlockNotFound(_))
    }
}

/// The ordered, hash-linked sequence of blocks held by one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    next_index: u64,
    last_hash: Digest,
    blocks: Vec<Block>,
}

impl Chain {
    /// Create a chain with a single genesis block
    pub fn genesis(timestamp: i64, data: Vec<u8>) -> Self {
        Self::from_genesis(Block::genesis(timestamp, data))
    }

    /// Seed a fresh chain from a received genesis block.
    ///
    /// The block's previous hash is taken as-is.
    pub fn from_genesis(block: Block) -> Self {
        Self {
            next_index: 1,
            last_hash: block.hash(),
            blocks: vec![block],
        }
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn last_hash(&self) -> Digest {
        self.last_hash
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Get a block by index
    pub fn get_block(&self, index: u64) -> Result<&Block, ChainError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.blocks.get(i))
            .ok_or(ChainError::BlockNotFound(index))
    }

    /// Append a block that links to the current tip.
    ///
    /// Leaves the chain untouched on error.
    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        if block.index != self.next_index {
            return Err(ChainError::IndexMismatch {
                expected: self.next_index,
                got: block.index,
            });
        }
        if block.previous_hash != self.last_hash {
            return Err(ChainError::PreviousHashMismatch {
                expected: self.last_hash,
                got: block.previous_hash,
            });
        }

        self.last_hash = block.hash();
        self.next_index += 1;
        self.blocks.push(block);
        Ok(())
    }

    /// Build the next block from the tip and append it, returning its index
    pub fn append_data(&mut self, timestamp: i64, data: Vec<u8>) -> Result<u64, ChainError> {
        let index = self.next_index;
        self.append(Block::new(index, self.last_hash, timestamp, data))?;
        Ok(index)
    }

    /// Recompute the hash links from the first block forward.
    ///
    /// Index contiguity and timestamp ordering are not checked.
    pub fn verify_consistency(&self) -> bool {
        let Some((first, rest)) = self.blocks.split_first() else {
            return false;
        };

        let mut last_hash = first.hash();
        for block in rest {
            if block.previous_hash != last_hash {
                return false;
            }
            last_hash = block.hash();
        }

        last_hash == self.last_hash
    }

    /// Get chain statistics
    pub fn stats(&self) -> ChainStats {
        ChainStats {
            next_index: self.next_index,
            total_blocks: self.blocks.len(),
            total_bytes: self.blocks.iter().map(|b| b.data.len()).sum(),
            last_hash: self.last_hash,
        }
    }
}

/// Chain statistics
#[derive(Debug, Clone)]
pub struct ChainStats {
    pub next_index: u64,
    pub total_blocks: usize,
    pub total_bytes: usize,
    pub last_hash: Digest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;

    fn chain_with_records(count: u8) -> Chain {
        let mut chain = Chain::genesis(1_000, vec![]);
        for i in 0..count {
            chain.append_data(1_000 + i as i64 + 1, vec![i]).unwrap();
        }
        chain
    }

    #[test]
    fn test_new_chain() {
        let chain = Chain::genesis(1_000, vec![]);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.next_index(), 1);
        assert_eq!(chain.blocks()[0].index, 0);
        assert_eq!(chain.blocks()[0].previous_hash, Digest::ZERO);
        assert_eq!(chain.last_hash(), sha256(&[]));
        assert!(chain.verify_consistency());
    }

    #[test]
    fn test_append_keeps_chain_consistent() {
        let mut chain = Chain::genesis(1_000, vec![]);
        for i in 0..5u8 {
            let index = chain.append_data(2_000, vec![i]).unwrap();
            assert_eq!(index, i as u64 + 1);
            assert!(chain.verify_consistency());
        }

        assert_eq!(chain.next_index(), 6);
        assert_eq!(chain.last_hash(), chain.blocks()[5].hash());
        for pair in chain.blocks().windows(2) {
            assert_eq!(pair[1].index, pair[0].index + 1);
            assert_eq!(pair[1].previous_hash, pair[0].hash());
        }
    }

    #[test]
    fn test_invalid_block_rejected() {
        let mut chain = chain_with_records(2);
        let before = chain.clone();

        let wrong_hash = Block::new(3, sha256(b"nope"), 5_000, vec![9]);
        assert!(matches!(
            chain.append(wrong_hash),
            Err(ChainError::PreviousHashMismatch { .. })
        ));
        assert_eq!(chain, before);

        let wrong_index = Block::new(7, chain.last_hash(), 5_000, vec![9]);
        let err = chain.append(wrong_index).unwrap_err();
        assert_eq!(err, ChainError::IndexMismatch { expected: 3, got: 7 });
        assert!(err.is_validation());
        assert_eq!(chain, before);

        let stale = Block::new(1, chain.last_hash(), 5_000, vec![9]);
        assert!(chain.append(stale).is_err());
        assert_eq!(chain, before);
    }

    #[test]
    fn test_get_block() {
        let chain = chain_with_records(3);
        assert_eq!(chain.get_block(2).unwrap().data, vec![1]);

        let err = chain.get_block(4).unwrap_err();
        assert_eq!(err, ChainError::BlockNotFound(4));
        assert!(!err.is_validation());
        assert!(chain.get_block(u64::MAX).is_err());
    }

    #[test]
    fn test_tampered_data_detected() {
        let mut chain = chain_with_records(4);
        let original = chain.blocks[2].hash();

        chain.blocks[2].data[0] ^= 0xff;

        assert_ne!(chain.blocks[2].hash(), original);
        assert!(!chain.verify_consistency());
    }

    #[test]
    fn test_tampered_tip_detected() {
        let mut chain = chain_with_records(2);
        chain.blocks[2].data.push(7);
        assert!(!chain.verify_consistency());
    }

    #[test]
    fn test_metadata_changes_go_unnoticed() {
        // Only payloads are hashed, so rewriting a timestamp keeps the chain valid.
        let mut chain = chain_with_records(2);
        chain.blocks[1].timestamp = 0;
        assert!(chain.verify_consistency());
    }

    #[test]
    fn test_from_genesis_keeps_foreign_previous_hash() {
        let block = Block::new(0, sha256(b"elsewhere"), 10, b"root".to_vec());
        let chain = Chain::from_genesis(block.clone());

        assert_eq!(chain.next_index(), 1);
        assert_eq!(chain.last_hash(), block.hash());
        assert!(chain.verify_consistency());
    }

    #[test]
    fn test_stats() {
        let chain = chain_with_records(3);
        let stats = chain.stats();
        assert_eq!(stats.next_index, 4);
        assert_eq!(stats.total_blocks, 4);
        assert_eq!(stats.total_bytes, 3);
        assert_eq!(stats.last_hash, chain.last_hash());
    }
}
