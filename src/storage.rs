//! Storage interface and in-memory implementation.
//!
//! Grounded in the teacher's `storage.rs::Storage` trait (one method per
//! capability, a `thiserror` error enum) and in
//! `examples/original_source/core/storage.go`/`account.go`/`nft.go` for the
//! capability set. The teacher backs its trait with `sled`; per the
//! specification's non-goal on durable storage, this implementation keeps
//! everything in memory behind one lock per map, matching the "pluggable
//! storage" design note: a persistent implementation would swap these maps
//! for a write-ahead-logged store without touching the trait.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::block::Block;
use crate::hash::{Address, Hash};
use crate::tx::{Inner, Transaction};
use crate::vm::{VmError, VmState};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("document already exists")]
    DocumentExists,
    #[error("document not found")]
    DocumentNotFound,
    #[error("operation not valid for this record")]
    TypeInvalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountState {
    pub addr: Address,
    pub nonce: u64,
    pub balance: u64,
}

impl AccountState {
    fn new(addr: Address) -> Self {
        AccountState {
            addr,
            nonce: 0,
            balance: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftAsset {
    pub type_: String,
    pub data: Vec<u8>,
    pub collection: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftCollection {
    pub type_: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coinbase {
    pub addr: Address,
    pub value: u64,
}

/// Capability set the chain engine consumes. `put_*` variants fail
/// [`StorageError::DocumentExists`] on a duplicate content hash;
/// `update_account_balance` creates missing accounts at zero balance before
/// applying the delta, per §6.
///
/// `Storage` is also the VM's [`VmState`]: the contract state the VM reads
/// and writes is just another map this same storage layer owns.
pub trait Storage: Send + Sync + VmState {
    fn put_block(&self, block: &Block) -> Result<(), StorageError>;
    fn get_block(&self, hash: &Hash) -> Option<Block>;
    fn has_block(&self, hash: &Hash) -> bool;

    fn put_nft(&self, hash: Hash, asset: NftAsset) -> Result<(), StorageError>;
    fn get_nft(&self, hash: &Hash) -> Option<NftAsset>;
    fn has_nft(&self, hash: &Hash) -> bool;

    fn put_collection(&self, hash: Hash, collection: NftCollection) -> Result<(), StorageError>;
    fn get_collection(&self, hash: &Hash) -> Option<NftCollection>;
    fn has_collection(&self, hash: &Hash) -> bool;

    fn put_transfer(&self, hash: Hash, tx: Transaction) -> Result<(), StorageError>;
    fn get_transfer(&self, hash: &Hash) -> Option<Transaction>;
    fn get_transfers_of_account(&self, addr: &Address) -> (Vec<Transaction>, Vec<Transaction>);

    fn put_account(&self, account: AccountState) -> Result<(), StorageError>;
    fn get_account(&self, addr: &Address) -> Option<AccountState>;
    fn update_account_balance(&self, addr: &Address, signed_delta: i64) -> Result<(), StorageError>;
    fn increase_account_nonce(&self, addr: &Address) -> Result<(), StorageError>;

    /// Creates an account entry for `addr` if it doesn't already exist.
    /// Idempotent: a second call is a no-op success, not `DocumentExists`.
    fn put_new_account(&self, addr: Address) -> Result<(), StorageError>;

    fn put_coinbase(&self, coinbase: Coinbase) -> Result<(), StorageError>;
    fn get_coinbase(&self) -> Option<Coinbase>;
}

#[derive(Default)]
pub struct InMemoryStorage {
    blocks: RwLock<HashMap<Hash, Block>>,
    nfts: RwLock<HashMap<Hash, NftAsset>>,
    collections: RwLock<HashMap<Hash, NftCollection>>,
    transfers: RwLock<HashMap<Hash, Transaction>>,
    transfer_index: RwLock<HashMap<Address, (Vec<Hash>, Vec<Hash>)>>,
    accounts: RwLock<HashMap<Address, AccountState>>,
    coinbase: RwLock<Option<Coinbase>>,
    vm_state: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an account with a non-zero balance for test fixtures. Not part
    /// of the production `Storage` trait: the operator-facing creation path
    /// (`put_new_account`) never credits a balance, so this stays
    /// `#[cfg(test)]`-only per the resolved open question in `DESIGN.md`.
    #[cfg(test)]
    pub fn seed_test_account(&self, addr: Address, balance: u64) {
        self.accounts
            .write()
            .unwrap()
            .insert(addr, AccountState { addr, nonce: 0, balance });
    }
}

impl Storage for InMemoryStorage {
    fn put_block(&self, block: &Block) -> Result<(), StorageError> {
        let hash = block.header.hash();
        let mut blocks = self.blocks.write().unwrap();
        if blocks.contains_key(&hash) {
            return Err(StorageError::DocumentExists);
        }
        blocks.insert(hash, block.clone());
        Ok(())
    }

    fn get_block(&self, hash: &Hash) -> Option<Block> {
        self.blocks.read().unwrap().get(hash).cloned()
    }

    fn has_block(&self, hash: &Hash) -> bool {
        self.blocks.read().unwrap().contains_key(hash)
    }

    fn put_nft(&self, hash: Hash, asset: NftAsset) -> Result<(), StorageError> {
        let mut nfts = self.nfts.write().unwrap();
        if nfts.contains_key(&hash) {
            return Err(StorageError::DocumentExists);
        }
        nfts.insert(hash, asset);
        Ok(())
    }

    fn get_nft(&self, hash: &Hash) -> Option<NftAsset> {
        self.nfts.read().unwrap().get(hash).cloned()
    }

    fn has_nft(&self, hash: &Hash) -> bool {
        self.nfts.read().unwrap().contains_key(hash)
    }

    fn put_collection(&self, hash: Hash, collection: NftCollection) -> Result<(), StorageError> {
        let mut collections = self.collections.write().unwrap();
        if collections.contains_key(&hash) {
            return Err(StorageError::DocumentExists);
        }
        collections.insert(hash, collection);
        Ok(())
    }

    fn get_collection(&self, hash: &Hash) -> Option<NftCollection> {
        self.collections.read().unwrap().get(hash).cloned()
    }

    fn has_collection(&self, hash: &Hash) -> bool {
        self.collections.read().unwrap().contains_key(hash)
    }

    fn put_transfer(&self, hash: Hash, tx: Transaction) -> Result<(), StorageError> {
        let (from, to) = match &tx.inner {
            Inner::Transfer { from, to, .. } => (*from, *to),
            _ => return Err(StorageError::TypeInvalid),
        };
        {
            let mut transfers = self.transfers.write().unwrap();
            if transfers.contains_key(&hash) {
                return Err(StorageError::DocumentExists);
            }
            transfers.insert(hash, tx);
        }
        let mut index = self.transfer_index.write().unwrap();
        index.entry(from).or_default().0.push(hash);
        index.entry(to).or_default().1.push(hash);
        Ok(())
    }

    fn get_transfer(&self, hash: &Hash) -> Option<Transaction> {
        self.transfers.read().unwrap().get(hash).cloned()
    }

    fn get_transfers_of_account(&self, addr: &Address) -> (Vec<Transaction>, Vec<Transaction>) {
        let index = self.transfer_index.read().unwrap();
        let transfers = self.transfers.read().unwrap();
        let (out_hashes, in_hashes) = match index.get(addr) {
            Some(entry) => entry.clone(),
            None => return (Vec::new(), Vec::new()),
        };
        let outgoing = out_hashes.iter().filter_map(|h| transfers.get(h).cloned()).collect();
        let incoming = in_hashes.iter().filter_map(|h| transfers.get(h).cloned()).collect();
        (outgoing, incoming)
    }

    fn put_account(&self, account: AccountState) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().unwrap();
        if accounts.contains_key(&account.addr) {
            return Err(StorageError::DocumentExists);
        }
        accounts.insert(account.addr, account);
        Ok(())
    }

    fn get_account(&self, addr: &Address) -> Option<AccountState> {
        self.accounts.read().unwrap().get(addr).copied()
    }

    fn update_account_balance(&self, addr: &Address, signed_delta: i64) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts.entry(*addr).or_insert_with(|| AccountState::new(*addr));
        let updated = if signed_delta >= 0 {
            account.balance.checked_add(signed_delta as u64)
        } else {
            account.balance.checked_sub(signed_delta.unsigned_abs())
        };
        account.balance = updated.ok_or(StorageError::TypeInvalid)?;
        Ok(())
    }

    fn increase_account_nonce(&self, addr: &Address) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts.entry(*addr).or_insert_with(|| AccountState::new(*addr));
        account.nonce = account.nonce.checked_add(1).ok_or(StorageError::TypeInvalid)?;
        Ok(())
    }

    fn put_new_account(&self, addr: Address) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().unwrap();
        accounts.entry(addr).or_insert_with(|| AccountState::new(addr));
        Ok(())
    }

    fn put_coinbase(&self, coinbase: Coinbase) -> Result<(), StorageError> {
        let mut slot = self.coinbase.write().unwrap();
        if slot.is_some() {
            return Err(StorageError::DocumentExists);
        }
        *slot = Some(coinbase);
        Ok(())
    }

    fn get_coinbase(&self) -> Option<Coinbase> {
        *self.coinbase.read().unwrap()
    }
}

impl VmState for InMemoryStorage {
    fn vm_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.vm_state.read().unwrap().get(key).cloned()
    }

    fn vm_put(&self, key: &[u8], value: Vec<u8>) -> Result<(), VmError> {
        let mut state = self.vm_state.write().unwrap();
        if state.contains_key(key) {
            return Err(VmError::StateKeyExists);
        }
        state.insert(key.to_vec(), value);
        Ok(())
    }

    fn vm_delete(&self, key: &[u8]) {
        self.vm_state.write().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn get_account_does_not_create() {
        let storage = InMemoryStorage::new();
        assert!(storage.get_account(&addr(1)).is_none());
        assert!(storage.get_account(&addr(1)).is_none());
    }

    #[test]
    fn put_new_account_is_idempotent_and_zero_balance() {
        let storage = InMemoryStorage::new();
        storage.put_new_account(addr(1)).unwrap();
        storage.put_new_account(addr(1)).unwrap();
        let account = storage.get_account(&addr(1)).unwrap();
        assert_eq!(account.balance, 0);
    }

    #[test]
    fn update_account_balance_creates_missing_account() {
        let storage = InMemoryStorage::new();
        storage.update_account_balance(&addr(2), 50).unwrap();
        assert_eq!(storage.get_account(&addr(2)).unwrap().balance, 50);
        storage.update_account_balance(&addr(2), -20).unwrap();
        assert_eq!(storage.get_account(&addr(2)).unwrap().balance, 30);
    }

    #[test]
    fn balance_underflow_is_rejected() {
        let storage = InMemoryStorage::new();
        storage.update_account_balance(&addr(3), 10).unwrap();
        assert_eq!(
            storage.update_account_balance(&addr(3), -20),
            Err(StorageError::TypeInvalid)
        );
    }

    #[test]
    fn duplicate_nft_mint_is_rejected() {
        let storage = InMemoryStorage::new();
        let h = Hash::digest(b"asset");
        let asset = NftAsset {
            type_: "art".into(),
            data: vec![1, 2, 3],
            collection: Hash::ZERO,
        };
        storage.put_nft(h, asset.clone()).unwrap();
        assert_eq!(storage.put_nft(h, asset), Err(StorageError::DocumentExists));
    }

    #[test]
    fn vm_state_put_is_first_write_wins() {
        let storage = InMemoryStorage::new();
        storage.vm_put(b"k", vec![1]).unwrap();
        assert_eq!(storage.vm_put(b"k", vec![2]), Err(VmError::StateKeyExists));
        assert_eq!(storage.vm_get(b"k"), Some(vec![1]));
    }
}
