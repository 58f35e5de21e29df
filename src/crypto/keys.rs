//! ECDSA key management for signed records
//!
//! Provides key pair generation, signing, and verification using the
//! secp256k1 curve, plus a small keyring that loads named keys from
//! hex files (`<name>_priv.hex`, `<name>_pub.hex`).

use crate::crypto::hash::Digest;
use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key = SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        let public_key = PublicKey::from_secret_key(&Secp256k1::new(), &secret_key);
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Compressed public key as hex
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Sign a document hash; returns the 64-byte compact signature
    pub fn sign(&self, hash: &Digest) -> Result<Vec<u8>, KeyError> {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(hash.as_bytes())?;
        Ok(secp
            .sign_ecdsa(&message, &self.secret_key)
            .serialize_compact()
            .to_vec())
    }
}

/// Parse a compressed or uncompressed public key from hex
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey, KeyError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|_| KeyError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// Check a compact signature over a document hash.
///
/// A malformed signature is an error; a well-formed one that does not match
/// is `Ok(false)`.
pub fn verify_signature(
    public_key: &PublicKey,
    hash: &Digest,
    signature: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::new();
    let message = Message::from_digest_slice(hash.as_bytes())?;
    let sig = Signature::from_compact(signature).map_err(|_| KeyError::InvalidSignature)?;

    Ok(secp.verify_ecdsa(&message, &sig, public_key).is_ok())
}

/// Named keys selected for signing and verification
pub struct Keyring {
    dir: PathBuf,
    signing: Option<(String, KeyPair)>,
    verifying: Option<(String, PublicKey)>,
}

impl Keyring {
    /// Keyring reading and writing key files in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            signing: None,
            verifying: None,
        }
    }

    pub fn private_key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}_priv.hex", name))
    }

    pub fn public_key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}_pub.hex", name))
    }

    /// Generate a key pair and write both halves to disk
    pub fn generate(&self, name: &str) -> Result<KeyPair, KeyError> {
        let pair = KeyPair::generate();
        write_key(&self.private_key_path(name), &pair.private_key_hex())?;
        write_key(&self.public_key_path(name), &pair.public_key_hex())?;
        log::info!("Generated key pair {}", name);
        Ok(pair)
    }

    /// Select the private key used by `sign`
    pub fn use_private_key(&mut self, name: &str) -> Result<(), KeyError> {
        let hex_key = read_key(&self.private_key_path(name))?;
        let pair = KeyPair::from_private_key_hex(&hex_key)?;
        self.signing = Some((name.to_string(), pair));
        Ok(())
    }

    /// Select the public key used to verify signatures
    pub fn use_public_key(&mut self, name: &str) -> Result<(), KeyError> {
        let hex_key = read_key(&self.public_key_path(name))?;
        let key = public_key_from_hex(&hex_key)?;
        self.verifying = Some((name.to_string(), key));
        Ok(())
    }

    pub fn signer(&self) -> Option<(&str, &KeyPair)> {
        self.signing.as_ref().map(|(name, pair)| (name.as_str(), pair))
    }

    pub fn verifier(&self) -> Option<(&str, &PublicKey)> {
        self.verifying.as_ref().map(|(name, key)| (name.as_str(), key))
    }
}

fn write_key(path: &Path, contents: &str) -> Result<(), KeyError> {
    fs::write(path, contents).map_err(|source| KeyError::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}

fn read_key(path: &Path) -> Result<String, KeyError> {
    fs::read_to_string(path).map_err(|source| KeyError::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}
