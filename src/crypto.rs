//! Ed25519 key and signature wrappers, and address derivation.
//!
//! Mirrors the teacher's [`crate`]-wide pattern of wrapping `ed25519-dalek`
//! types in newtypes with manual `Serialize`/`Deserialize` impls so the
//! wire/hash bytes are exactly the 32/64-byte key and signature encodings,
//! not whatever `serde`'s derive would pick for the underlying dalek type.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::hash::Address;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid private key bytes")]
    InvalidPrivateKey,
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("signature missing")]
    SignatureMissing,
    #[error("signature invalid")]
    SignatureInvalid,
}

/// Ed25519 public key, and the sole input to address derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(bytes)
            .map(PublicKey)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// `Address(pk) = low-20-bytes(SHA-256(pk_bytes))`.
    pub fn address(&self) -> Address {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..32]);
        Address::from_bytes(out)
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.0.verify(message, &signature.0).is_ok()
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        PublicKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Ed25519 private (signing) key.
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    pub fn generate<R: rand::CryptoRng + rand::RngCore>(rng: &mut R) -> Self {
        PrivateKey(SigningKey::generate(rng))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        PrivateKey(SigningKey::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message))
    }
}

/// Ed25519 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Signature(ed25519_dalek::Signature::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = serde_bytes_vec::deserialize(deserializer)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("invalid signature length"));
        }
        let arr: [u8; 64] = bytes.try_into().unwrap();
        Ok(Signature::from_bytes(&arr))
    }
}

/// Small helper so `Signature`'s `Deserialize` doesn't need an extra crate
/// for "read a `Vec<u8>`".
mod serde_bytes_vec {
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Vec::<u8>::deserialize(deserializer)
    }
    use serde::Deserialize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn sign_and_verify_roundtrip() {
        let sk = PrivateKey::generate(&mut OsRng);
        let pk = sk.public();
        let sig = sk.sign(b"hello");
        assert!(pk.verify(b"hello", &sig));
        assert!(!pk.verify(b"goodbye", &sig));
    }

    #[test]
    fn address_is_deterministic() {
        let sk = PrivateKey::generate(&mut OsRng);
        let pk = sk.public();
        assert_eq!(pk.address(), pk.address());
    }

    #[test]
    fn different_keys_different_addresses() {
        let a = PrivateKey::generate(&mut OsRng).public().address();
        let b = PrivateKey::generate(&mut OsRng).public().address();
        assert_ne!(a, b);
    }
}
