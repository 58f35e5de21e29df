//! Cryptographic utilities for the ledger
//!
//! This module provides SHA-256 hashing, the `Digest` value type
//! that links blocks together, and ECDSA keys for signing documents.

pub mod hash;
pub mod keys;

pub use hash::{sha256, sha256_file, sha256_hex, Digest, DIGEST_SIZE};
pub use keys::{public_key_from_hex, verify_signature, KeyError, KeyPair, Keyring};
