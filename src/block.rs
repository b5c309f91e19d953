//! Block header and body.
//!
//! Grounded in `examples/original_source/core/block.go` (field layout,
//! genesis special-casing) and the teacher's `types.rs::Block` for the
//! hash-caching shape.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec;
use crate::crypto::{CryptoError, PrivateKey, PublicKey, Signature};
use crate::hash::Hash;
use crate::tx::{Transaction, TxError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error("signature missing")]
    SignatureMissing,
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("data hash mismatch")]
    DataHashMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub prev_block_hash: Hash,
    pub data_hash: Hash,
    pub height: u32,
    /// Unix nanoseconds.
    pub timestamp: i64,
}

impl Header {
    pub fn hash(&self) -> Hash {
        Hash::digest(&codec::encode(self))
    }
}

/// The fixed genesis header: version 0, all-zero hashes, height 0, timestamp
/// 0. Pinned so two implementations agree on `hash(genesis_header)` without
/// special-casing the hash function itself.
pub fn genesis_header() -> Header {
    Header {
        version: 0,
        prev_block_hash: Hash::ZERO,
        data_hash: Hash::ZERO,
        height: 0,
        timestamp: 0,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub validator: Option<PublicKey>,
    pub signature: Option<Signature>,
    pub transactions: Vec<Transaction>,

    #[serde(skip)]
    cached_hash: Option<Hash>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Block {
            header,
            validator: None,
            signature: None,
            transactions,
            cached_hash: None,
        }
    }

    pub fn genesis(transactions: Vec<Transaction>) -> Self {
        let mut block = Block::new(genesis_header(), transactions);
        block.header.data_hash = block.compute_data_hash();
        block
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == 0
    }

    /// SHA-256 over the concatenated canonical encodings of the block's
    /// transactions, in order.
    pub fn compute_data_hash(&self) -> Hash {
        let mut buf = Vec::new();
        for tx in &self.transactions {
            buf.extend(codec::encode(tx));
        }
        Hash::digest(&buf)
    }

    /// Refreshes `header.data_hash` from the current transaction list.
    pub fn refresh_data_hash(&mut self) {
        self.header.data_hash = self.compute_data_hash();
        self.rehash();
    }

    /// Signs the block's header bytes with the validator key.
    pub fn sign(&mut self, key: &PrivateKey) {
        self.validator = Some(key.public());
        self.signature = Some(key.sign(&codec::encode(&self.header)));
        self.rehash();
    }

    /// Verifies the validator signature over the canonical header bytes.
    /// Genesis blocks require no signature.
    pub fn verify_signature(&self) -> Result<(), BlockError> {
        if self.is_genesis() {
            return Ok(());
        }
        let (validator, signature) = match (&self.validator, &self.signature) {
            (Some(v), Some(s)) => (v, s),
            _ => return Err(BlockError::SignatureMissing),
        };
        if validator.verify(&codec::encode(&self.header), signature) {
            Ok(())
        } else {
            Err(BlockError::SignatureInvalid)
        }
    }

    pub fn hash(&mut self) -> Hash {
        if let Some(h) = self.cached_hash {
            return h;
        }
        let h = self.header.hash();
        self.cached_hash = Some(h);
        h
    }

    /// Recomputes `block_hash`, ignoring any cached value. Call after
    /// mutating `header`.
    pub fn rehash(&mut self) -> Hash {
        self.cached_hash = None;
        self.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::Inner;
    use rand::rngs::OsRng;

    #[test]
    fn genesis_header_is_fixed() {
        let h = genesis_header();
        assert_eq!(h.version, 0);
        assert_eq!(h.height, 0);
        assert_eq!(h.timestamp, 0);
        assert!(h.prev_block_hash.is_zero());
        assert!(h.data_hash.is_zero());
    }

    #[test]
    fn genesis_needs_no_signature() {
        let block = Block::genesis(Vec::new());
        assert!(block.verify_signature().is_ok());
    }

    #[test]
    fn signed_block_verifies() {
        let key = PrivateKey::generate(&mut OsRng);
        let mut block = Block::new(
            Header {
                version: 1,
                prev_block_hash: Hash::ZERO,
                data_hash: Hash::ZERO,
                height: 1,
                timestamp: 1,
            },
            Vec::new(),
        );
        block.refresh_data_hash();
        block.sign(&key);
        assert!(block.verify_signature().is_ok());
    }

    #[test]
    fn tampered_header_fails_verification() {
        let key = PrivateKey::generate(&mut OsRng);
        let mut block = Block::new(
            Header {
                version: 1,
                prev_block_hash: Hash::ZERO,
                data_hash: Hash::ZERO,
                height: 1,
                timestamp: 1,
            },
            Vec::new(),
        );
        block.sign(&key);
        block.header.height = 2;
        assert_eq!(block.verify_signature(), Err(BlockError::SignatureInvalid));
    }

    #[test]
    fn data_hash_reflects_transactions() {
        let empty = Block::new(
            Header {
                version: 1,
                prev_block_hash: Hash::ZERO,
                data_hash: Hash::ZERO,
                height: 1,
                timestamp: 1,
            },
            Vec::new(),
        )
        .compute_data_hash();

        let tx = Transaction::new(Inner::None, vec![1], 0, 0);
        let non_empty = Block::new(
            Header {
                version: 1,
                prev_block_hash: Hash::ZERO,
                data_hash: Hash::ZERO,
                height: 1,
                timestamp: 1,
            },
            vec![tx],
        )
        .compute_data_hash();

        assert_ne!(empty, non_empty);
    }

    #[test]
    fn block_hash_is_cached_until_rehash() {
        let mut block = Block::new(
            Header {
                version: 1,
                prev_block_hash: Hash::ZERO,
                data_hash: Hash::ZERO,
                height: 1,
                timestamp: 1,
            },
            Vec::new(),
        );
        let h1 = block.hash();
        block.header.height = 2;
        let h2 = block.hash();
        assert_eq!(h1, h2);
        let h3 = block.rehash();
        assert_ne!(h2, h3);
    }
}
