//! Account export helper (§6 "Persistent state layout").
//!
//! No durable state layout is required of the core; this is the one
//! serialization helper the spec calls out by name, for handing an
//! account's key material to an external wallet tool. Goes through the
//! same canonical encoding as everything else so the exported bytes are
//! stable across implementations.

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::crypto::PrivateKey;
use crate::hash::Hash;

/// An exported account: its private key, plus an optional map of
/// transaction-hash to value standing in for an unspent-output set (the
/// ledger here is account-balance, not UTXO, so this is a hint rather
/// than a spendable record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedAccount {
    private_key: [u8; 32],
    pub unspent_hint: Vec<(Hash, u64)>,
}

impl ExportedAccount {
    pub fn new(key: &PrivateKey, unspent_hint: Vec<(Hash, u64)>) -> Self {
        ExportedAccount { private_key: key.to_bytes(), unspent_hint }
    }

    pub fn private_key(&self) -> PrivateKey {
        PrivateKey::from_bytes(&self.private_key)
    }

    pub fn encode(&self) -> Vec<u8> {
        codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn export_round_trips_through_the_canonical_encoding() {
        let key = PrivateKey::generate(&mut OsRng);
        let exported = ExportedAccount::new(&key, vec![(Hash::ZERO, 100)]);
        let bytes = exported.encode();
        let decoded = ExportedAccount::decode(&bytes).unwrap();
        assert_eq!(decoded.private_key().public(), key.public());
        assert_eq!(decoded.unspent_hint, vec![(Hash::ZERO, 100)]);
    }
}
