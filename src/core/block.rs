//! Block implementation for the ledger
//!
//! A block carries one opaque payload plus the metadata that links it into
//! the chain. Blocks travel between nodes as the hex encoding of a fixed
//! little-endian layout:
//!
//! ```text
//! index:i64 | previous_hash:[u8; 32] | timestamp:i64 | data_length:i32 | data
//! ```

use crate::crypto::{sha256, Digest, DIGEST_SIZE};
use bytes::{Buf, BufMut};
use serde::Serialize;
use thiserror::Error;

/// Size of the fixed part of a wire-encoded block (8 + 32 + 8 + 4)
pub const WIRE_HEADER_SIZE: usize = 8 + DIGEST_SIZE + 8 + 4;

// =============================================================================
// Block Errors
// =============================================================================

/// Wire decoding errors
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("Block too short: {0} bytes (header is 52)")]
    Truncated(usize),
    #[error("Negative block index: {0}")]
    NegativeIndex(i64),
}

/// A block in the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position in the chain, 0 for genesis
    pub index: u64,
    /// Hash of the preceding block (zero for a locally created genesis)
    pub previous_hash: Digest,
    /// Creation time in seconds since the Unix epoch
    pub timestamp: i64,
    /// Declared payload length, kept as received even if it disagrees with `data`
    pub data_length: i32,
    /// Opaque payload
    pub data: Vec<u8>,
}

impl Block {
    /// Create a new block whose declared length matches its payload
    pub fn new(index: u64, previous_hash: Digest, timestamp: i64, data: Vec<u8>) -> Self {
        let data_length = i32::try_from(data.len()).unwrap_or(i32::MAX);
        Self {
            index,
            previous_hash,
            timestamp,
            data_length,
            data,
        }
    }

    /// Create a genesis block (index 0, zero previous hash)
    pub fn genesis(timestamp: i64, data: Vec<u8>) -> Self {
        Self::new(0, Digest::ZERO, timestamp, data)
    }

    /// Hash of the block.
    ///
    /// Covers the payload only: index, previous hash and timestamp are not
    /// part of the digest, so two blocks carrying the same data hash alike.
    /// Must stay byte-compatible with what peers compute.
    pub fn hash(&self) -> Digest {
        sha256(&self.data)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Serialize to the little-endian wire layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(WIRE_HEADER_SIZE + self.data.len());
        buf.put_i64_le(self.index as i64);
        buf.put_slice(self.previous_hash.as_bytes());
        buf.put_i64_le(self.timestamp);
        buf.put_i32_le(self.data_length);
        buf.put_slice(&self.data);
        buf
    }

    /// Hex string used as the argument of `BLOCK-ADD`
    pub fn to_wire(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Decode from the little-endian wire layout.
    ///
    /// The payload is every byte after the header, whatever `data_length` says.
    pub fn from_bytes(bin: &[u8]) -> Result<Self, BlockError> {
        if bin.len() < WIRE_HEADER_SIZE {
            return Err(BlockError::Truncated(bin.len()));
        }

        let mut buf = bin;
        let index = buf.get_i64_le();
        if index < 0 {
            return Err(BlockError::NegativeIndex(index));
        }

        let mut previous_hash = [0u8; DIGEST_SIZE];
        buf.copy_to_slice(&mut previous_hash);
        let timestamp = buf.get_i64_le();
        let data_length = buf.get_i32_le();

        Ok(Self {
            index: index as u64,
            previous_hash: Digest::new(previous_hash),
            timestamp,
            data_length,
            data: buf.to_vec(),
        })
    }

    /// Decode a `BLOCK-ADD` argument
    pub fn from_wire(s: &str) -> Result<Self, BlockError> {
        let bin = hex::decode(s)?;
        Self::from_bytes(&bin)
    }

    /// JSON-friendly view of the block
    pub fn view(&self) -> BlockView {
        BlockView {
            index: self.index,
            hash: self.hash(),
            previous_hash: self.previous_hash,
            timestamp: self.timestamp,
            data_length: self.data_length,
            data: hex::encode(&self.data),
        }
    }
}

/// Serializable rendering of a block, with its hash and hex payload
#[derive(Debug, Clone, Serialize)]
pub struct BlockView {
    pub index: u64,
    pub hash: Digest,
    pub previous_hash: Digest,
    pub timestamp: i64,
    pub data_length: i32,
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        let mut hash = [0u8; DIGEST_SIZE];
        for (i, byte) in hash.iter_mut().enumerate() {
            *byte = i as u8 + 1;
        }
        Block::new(123123123, Digest::new(hash), 321321321, vec![11, 22, 33, 44, 55])
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis(1_700_000_000, vec![]);
        assert_eq!(genesis.index, 0);
        assert!(genesis.is_genesis());
        assert_eq!(genesis.previous_hash, Digest::ZERO);
        assert_eq!(genesis.data_length, 0);
    }

    #[test]
    fn test_wire_layout() {
        let block = Block::new(1, Digest::ZERO, 2, vec![0xab]);
        let expected = format!(
            "{}{}{}{}{}",
            "0100000000000000",
            "00".repeat(32),
            "0200000000000000",
            "01000000",
            "ab"
        );
        assert_eq!(block.to_wire(), expected);
        assert_eq!(block.to_bytes().len(), WIRE_HEADER_SIZE + 1);
    }

    #[test]
    fn test_wire_roundtrip_preserves_hex() {
        let block = sample_block();
        let wire = block.to_wire();
        let decoded = Block::from_wire(&wire).unwrap();

        assert_eq!(decoded, block);
        assert_eq!(decoded.to_wire(), wire);
    }

    #[test]
    fn test_decode_tolerates_length_mismatch() {
        let mut block = sample_block();
        block.data_length = 99;
        let wire = block.to_wire();

        let decoded = Block::from_wire(&wire).unwrap();
        assert_eq!(decoded.data, vec![11, 22, 33, 44, 55]);
        assert_eq!(decoded.data_length, 99);
        assert_eq!(decoded.to_wire(), wire);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(
            Block::from_wire("not hex"),
            Err(BlockError::InvalidHex(_))
        ));
        assert!(matches!(
            Block::from_wire(&"00".repeat(WIRE_HEADER_SIZE - 1)),
            Err(BlockError::Truncated(51))
        ));

        let mut bytes = Block::genesis(0, vec![]).to_bytes();
        bytes[..8].copy_from_slice(&(-1i64).to_le_bytes());
        assert!(matches!(
            Block::from_bytes(&bytes),
            Err(BlockError::NegativeIndex(-1))
        ));
    }

    #[test]
    fn test_hash_covers_payload_only() {
        let a = Block::new(1, Digest::ZERO, 10, vec![1, 2, 3]);
        let b = Block::new(7, sha256(b"other"), 99, vec![1, 2, 3]);
        assert_eq!(a.hash(), b.hash());

        let c = Block::new(1, Digest::ZERO, 10, vec![1, 2, 4]);
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_block_view_json() {
        let block = Block::new(3, Digest::ZERO, 42, vec![0xde, 0xad]);
        let json = serde_json::to_value(block.view()).unwrap();

        assert_eq!(json["index"], 3);
        assert_eq!(json["data"], "dead");
        assert_eq!(json["hash"], block.hash().to_hex());
        assert_eq!(json["previous_hash"], "00".repeat(32));
    }
}
