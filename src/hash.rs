//! 32-byte hash and 20-byte address types shared across the data model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte SHA-256 digest.
///
/// The all-zero value is the "unset" sentinel used by the genesis block's
/// `prev_block_hash`/`data_hash` and by a freshly-constructed, not-yet-hashed
/// [`crate::tx::Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Hash of the given bytes, SHA-256.
    pub fn digest(bytes: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Hash(hasher.finalize().into())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash {
    fn from(value: [u8; 32]) -> Self {
        Hash(value)
    }
}

/// A 20-byte address. The zero value is the coinbase/genesis sentinel
/// account used to seed supply and to credit block validators' fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const COINBASE: Address = Address([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_coinbase(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hash_is_unset() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::digest(b"x").is_zero());
    }

    #[test]
    fn hex_rendering_is_lowercase() {
        let h = Hash::digest(b"abc");
        let s = h.to_string();
        assert_eq!(s, s.to_lowercase());
        assert_eq!(s.len(), 64);
    }

    #[test]
    fn coinbase_address_is_zero() {
        assert!(Address::COINBASE.is_coinbase());
    }
}
