//! Transaction envelope: a polymorphic inner payload plus the outer
//! signing/fee/validity wrapper.
//!
//! Grounded in the teacher's `types.rs::Transaction` (hash caching, a
//! manually-serialized signature newtype) and in
//! `examples/original_source/core/transaction.go`/`transfer.go`/`mint.go`/
//! `nft.go` for the actual field layout and hash-input assembly. The
//! original dispatches on payload type with a runtime type assertion
//! (`tx.Data.(*TransferTx)`); here `Inner` is a closed, exhaustively-matched
//! sum instead (see `DESIGN.md`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec;
use crate::crypto::{CryptoError, PrivateKey, PublicKey, Signature};
use crate::hash::{Address, Hash};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("signature missing")]
    SignatureMissing,
    #[error("signature invalid")]
    SignatureInvalid,
}

/// Either side of a mint: a unique asset, or the collection an asset can
/// belong to. Collections carry no payload beyond their declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NftPayload {
    Asset {
        #[serde(rename = "type")]
        type_: String,
        data: Vec<u8>,
        collection: Hash,
    },
    Collection {
        #[serde(rename = "type")]
        type_: String,
    },
}

impl NftPayload {
    fn encode_for_hash(&self) -> Vec<u8> {
        match self {
            NftPayload::Asset {
                type_,
                data,
                collection,
            } => {
                let mut out = codec::encode(type_);
                out.extend(codec::encode(data));
                out.extend(collection.as_bytes());
                out
            }
            NftPayload::Collection { type_ } => codec::encode(type_),
        }
    }
}

/// The transaction's polymorphic payload. `None` is a pure VM-data
/// transaction: only `Transaction::data` is executed, nothing native
/// happens during application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inner {
    None,
    Transfer {
        signer: Option<PublicKey>,
        sig: Option<Signature>,
        from: Address,
        to: Address,
        value: u64,
    },
    Mint {
        owner: Option<PublicKey>,
        sig: Option<Signature>,
        nft: NftPayload,
        metadata: Vec<u8>,
    },
}

impl Inner {
    /// Bytes the inner payload's own signature is computed over. Distinct
    /// from the outer transaction's hash-input bytes.
    fn signing_bytes(&self) -> Vec<u8> {
        match self {
            Inner::None => Vec::new(),
            Inner::Transfer { from, to, value, .. } => {
                let mut out = codec::encode(from);
                out.extend(codec::encode(to));
                out.extend(codec::encode(value));
                out
            }
            Inner::Mint { nft, metadata, .. } => {
                let mut out = nft.encode_for_hash();
                out.extend(codec::encode(metadata));
                out
            }
        }
    }

    /// Signs the inner payload in place with `key`, filling in `signer`/`sig`
    /// (Transfer) or `owner`/`sig` (Mint). A no-op for `None`.
    pub fn sign(&mut self, key: &PrivateKey) {
        let bytes = self.signing_bytes();
        match self {
            Inner::None => {}
            Inner::Transfer { signer, sig, .. } => {
                *signer = Some(key.public());
                *sig = Some(key.sign(&bytes));
            }
            Inner::Mint { owner, sig, .. } => {
                *owner = Some(key.public());
                *sig = Some(key.sign(&bytes));
            }
        }
    }

    /// Verifies the inner signature, if this variant carries one.
    pub fn verify(&self) -> Result<(), TxError> {
        let bytes = self.signing_bytes();
        match self {
            Inner::None => Ok(()),
            Inner::Transfer { signer, sig, .. } => verify_pair(signer, sig, &bytes),
            Inner::Mint { owner, sig, .. } => verify_pair(owner, sig, &bytes),
        }
    }

    /// `hash(MintInner)`: over nft-type, nft-data/collection-hash (for
    /// Asset), and metadata. The storage layer keys NFT/collection records
    /// by this hash, so two mints of the same content collide and the
    /// second is rejected as a duplicate. `None` for non-Mint variants.
    pub fn mint_hash(&self) -> Option<Hash> {
        match self {
            Inner::Mint { nft, metadata, .. } => {
                let mut bytes = nft.encode_for_hash();
                bytes.extend(codec::encode(metadata));
                Some(Hash::digest(&bytes))
            }
            _ => None,
        }
    }
}

fn verify_pair(
    key: &Option<PublicKey>,
    sig: &Option<Signature>,
    bytes: &[u8],
) -> Result<(), TxError> {
    let (key, sig) = match (key, sig) {
        (Some(k), Some(s)) => (k, s),
        _ => return Err(TxError::SignatureMissing),
    };
    if key.verify(bytes, sig) {
        Ok(())
    } else {
        Err(TxError::SignatureInvalid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Option<PublicKey>,
    pub signature: Option<Signature>,
    pub inner: Inner,
    pub data: Vec<u8>,
    pub nonce: u64,
    pub fee: u64,
    pub valid_from: i64,
    pub valid_until: i64,

    /// When this node first observed the transaction, not part of the
    /// canonical encoding: each node stamps its own arrival time.
    #[serde(skip)]
    pub first_seen_ts: i64,

    /// Memoized `hash()`. Cleared by [`Transaction::rehash`], which must be
    /// called after any mutation to `nonce` or `inner`.
    #[serde(skip)]
    cached_hash: Option<Hash>,
}

impl Transaction {
    pub fn new(inner: Inner, data: Vec<u8>, nonce: u64, fee: u64) -> Self {
        Transaction {
            from: None,
            signature: None,
            inner,
            data,
            nonce,
            fee,
            valid_from: 0,
            valid_until: 0,
            first_seen_ts: 0,
            cached_hash: None,
        }
    }

    /// The bytes the outer signature and the transaction hash are computed
    /// over: `data || encode(inner) || nonce`.
    fn hash_input(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if !self.data.is_empty() {
            out.extend(codec::encode(&self.data));
        }
        out.extend(codec::encode(&self.inner));
        out.extend(codec::encode(&self.nonce));
        out
    }

    /// Signs the outer transaction (and, for Transfer/Mint, the inner
    /// payload) with `key`, then rehashes.
    pub fn sign(&mut self, key: &PrivateKey) {
        self.inner.sign(key);
        let bytes = self.hash_input();
        self.from = Some(key.public());
        self.signature = Some(key.sign(&bytes));
        self.rehash();
    }

    /// Full signature verification: outer signature, then inner if present.
    pub fn verify(&self) -> Result<(), TxError> {
        let bytes = self.hash_input();
        verify_pair(&self.from, &self.signature, &bytes)?;
        self.inner.verify()
    }

    /// Returns the cached hash, computing and caching it on first call.
    pub fn hash(&mut self) -> Hash {
        if let Some(h) = self.cached_hash {
            return h;
        }
        let h = Hash::digest(&self.hash_input());
        self.cached_hash = Some(h);
        h
    }

    /// Recomputes the hash ignoring any cached value, and refreshes the
    /// cache. Must be called after mutating `nonce` or `inner`.
    pub fn rehash(&mut self) -> Hash {
        self.cached_hash = None;
        self.hash()
    }

    /// The hash as it was last cached, without triggering a recompute.
    /// `None` if the transaction has never been hashed.
    pub fn cached_hash(&self) -> Option<Hash> {
        self.cached_hash
    }

    pub fn is_within_validity(&self, now: i64) -> bool {
        let after_start = self.valid_from == 0 || now >= self.valid_from;
        let before_end = self.valid_until == 0 || now < self.valid_until;
        after_start && before_end
    }
}
