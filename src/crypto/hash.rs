//! Cryptographic hashing utilities for the ledger
//!
//! Provides the SHA-256 digest used to link blocks together and to
//! fingerprint payloads before they are appended.

use serde::{Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// Size of a digest in bytes (SHA-256 outputs 256 bits)
pub const DIGEST_SIZE: usize = 32;

/// A fixed-size SHA-256 hash value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    /// The all-zero digest, used as the previous hash of a genesis block
    pub const ZERO: Digest = Digest([0u8; DIGEST_SIZE]);

    pub const fn new(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Lowercase hex representation
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First `len` hex characters, for compact tables and log lines
    pub fn short(&self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len);
        hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; DIGEST_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&hasher.finalize());
    Digest(out)
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    sha256(data).to_hex()
}

/// Hashes the full contents of a file
pub fn sha256_file<P: AsRef<Path>>(path: P) -> io::Result<Digest> {
    let data = fs::read(path)?;
    Ok(sha256(&data))
}
