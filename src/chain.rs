//! The chain/ledger engine: an append-only block log plus per-transaction
//! application against account and contract state.
//!
//! Grounded in the teacher's `ledger.rs` (a thiserror error enum composing
//! storage errors, an injected storage handle) and in
//! `examples/original_source/core/blockchain.go`/`validator.go` for the
//! validate-then-apply sequence. The original's validator holds a
//! back-reference to the blockchain (§9's "shared, cyclical ownership"
//! note); here validation is just methods on `Chain` itself, so there's no
//! second object and no cycle to break.

use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::info;

use crate::block::{Block, BlockError, Header};
use crate::hash::{Address, Hash};
use crate::storage::{Coinbase, NftAsset, NftCollection, Storage, StorageError};
use crate::tx::{Inner, NftPayload, Transaction, TxError};
use crate::vm;

/// Minimum height gap above which a transaction is reported `Confirmed`.
pub const DEFAULT_CONFIRMS_LEVEL: u32 = 15;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockApplicationError {
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("invalid nonce")]
    NonceInvalid,
    #[error("type invalid")]
    TypeInvalid,
    #[error(transparent)]
    Vm(#[from] crate::vm::VmError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("block height out of order")]
    BlockHeightOutOfOrder,
    #[error("block already exists")]
    BlockAlreadyExists,
    #[error("previous hash mismatch")]
    PrevHashMismatch,
    #[error("data hash mismatch")]
    DataHashMismatch,
    #[error("signature missing")]
    SignatureMissing,
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("transaction not found")]
    TransactionNotFound,
    #[error(transparent)]
    Application(#[from] BlockApplicationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<BlockError> for ChainError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::SignatureMissing => ChainError::SignatureMissing,
            BlockError::SignatureInvalid | BlockError::DataHashMismatch => {
                ChainError::SignatureInvalid
            }
            BlockError::Crypto(_) | BlockError::Tx(_) => ChainError::SignatureInvalid,
        }
    }
}

impl From<TxError> for ChainError {
    fn from(e: TxError) -> Self {
        match e {
            TxError::SignatureMissing => ChainError::SignatureMissing,
            TxError::SignatureInvalid | TxError::Crypto(_) => ChainError::SignatureInvalid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed,
}

/// Append-only block log plus the account/contract state it accumulates.
/// Concurrency model: a reader-writer lock over the log; `add_block` holds
/// the writer lock for the duration of one block, readers elsewhere don't
/// block each other.
pub struct Chain<S: Storage> {
    storage: Arc<S>,
    log: RwLock<Vec<Block>>,
    confirms_level: u32,
}

impl<S: Storage> Chain<S> {
    /// Installs `genesis` without validation. If it contains a
    /// coinbase-like transfer (all-zero addresses, no signatures), seeds
    /// the coinbase account at its value.
    pub fn new(genesis: Block, storage: Arc<S>) -> Self {
        for tx in &genesis.transactions {
            if let Inner::Transfer {
                from,
                to,
                value,
                signer,
                sig,
            } = &tx.inner
            {
                if from.is_coinbase() && to.is_coinbase() && signer.is_none() && sig.is_none() {
                    let _ = storage.put_coinbase(Coinbase {
                        addr: Address::COINBASE,
                        value: *value,
                    });
                    let _ = storage.update_account_balance(&Address::COINBASE, *value as i64);
                }
            }
        }
        let _ = storage.put_block(&genesis);
        Chain {
            storage,
            log: RwLock::new(vec![genesis]),
            confirms_level: DEFAULT_CONFIRMS_LEVEL,
        }
    }

    pub fn with_confirms_level(mut self, confirms_level: u32) -> Self {
        self.confirms_level = confirms_level;
        self
    }

    pub fn height(&self) -> u32 {
        (self.log.read().unwrap().len() - 1) as u32
    }

    pub fn has_block(&self, height: u32) -> bool {
        (height as usize) < self.log.read().unwrap().len()
    }

    pub fn get_block(&self, height: u32) -> Option<Block> {
        self.log.read().unwrap().get(height as usize).cloned()
    }

    pub fn get_header(&self, height: u32) -> Option<Header> {
        self.get_block(height).map(|b| b.header)
    }

    /// Creates an account entry for `pk`'s address if one doesn't already
    /// exist. Used by the account-registration endpoint; idempotent.
    pub fn put_new_account(&self, addr: Address) -> Result<(), ChainError> {
        self.storage.put_new_account(addr).map_err(Into::into)
    }

    /// Reverse-scans blocks newest-first for `hash`, returning its status,
    /// containing block, and the transaction itself.
    pub fn get_transaction(&self, hash: &Hash) -> Result<(TxStatus, Block, Transaction), ChainError> {
        let log = self.log.read().unwrap();
        let current_height = (log.len() - 1) as u32;
        for block in log.iter().rev() {
            for tx in &block.transactions {
                let mut candidate = tx.clone();
                if candidate.rehash() == *hash {
                    let status = if current_height.saturating_sub(block.header.height)
                        > self.confirms_level
                    {
                        TxStatus::Confirmed
                    } else {
                        TxStatus::Pending
                    };
                    return Ok((status, block.clone(), candidate));
                }
            }
        }
        Err(ChainError::TransactionNotFound)
    }

    /// Returns the hashes of `txs` that should be dropped from the
    /// mempool: failing txs are reported, never mutated.
    pub fn soft_check(&self, txs: &[Transaction]) -> Vec<Hash> {
        let mut drop = Vec::new();
        for tx in txs {
            let mut tx = tx.clone();
            let hash = tx.rehash();

            let sender_addr = match &tx.from {
                Some(pk) => pk.address(),
                None => {
                    drop.push(hash);
                    continue;
                }
            };
            let sender = match self.storage.get_account(&sender_addr) {
                Some(a) => a,
                None => {
                    drop.push(hash);
                    continue;
                }
            };
            if sender.nonce.checked_add(1) != Some(tx.nonce) {
                drop.push(hash);
                continue;
            }

            let ok = match &tx.inner {
                Inner::None => true,
                Inner::Transfer { from, .. } => self.storage.get_account(from).is_some(),
                Inner::Mint { nft, .. } => {
                    let mint_hash = tx.inner.mint_hash().expect("Mint variant always hashes");
                    match nft {
                        NftPayload::Asset { .. } => !self.storage.has_nft(&mint_hash),
                        NftPayload::Collection { .. } => !self.storage.has_collection(&mint_hash),
                    }
                }
            };
            if !ok {
                drop.push(hash);
            }
        }
        drop
    }

    /// Validates `block` against the current chain state, then applies it.
    /// On success, appends it to the in-memory log and `storage.put_block`.
    /// On a mid-application failure, per-tx effects already performed are
    /// *not* rolled back (a known simplification), but the fee credit to
    /// the validator and the block append itself are skipped — fee
    /// accounting is all-or-nothing per block.
    pub fn add_block(&self, mut block: Block) -> Result<(), ChainError> {
        let mut log = self.log.write().unwrap();
        let current_height = (log.len() - 1) as u32;

        if block.header.height > current_height + 1 {
            return Err(ChainError::BlockHeightOutOfOrder);
        }
        if block.header.height <= current_height {
            return Err(ChainError::BlockAlreadyExists);
        }

        let mut parent = log[block.header.height as usize - 1].clone();
        if block.header.prev_block_hash != parent.hash() {
            return Err(ChainError::PrevHashMismatch);
        }

        block.verify_signature()?;
        for tx in &block.transactions {
            tx.verify()?;
        }
        if block.compute_data_hash() != block.header.data_hash {
            return Err(ChainError::DataHashMismatch);
        }

        let mut total_fee: u64 = 0;
        for tx in block.transactions.iter_mut() {
            self.apply_tx(tx, &mut total_fee)?;
        }

        if let Some(validator) = &block.validator {
            self.storage
                .update_account_balance(&validator.address(), total_fee as i64)
                .map_err(BlockApplicationError::from)?;
        }

        self.storage
            .put_block(&block)
            .map_err(BlockApplicationError::from)?;
        info!(height = block.header.height, txs = block.transactions.len(), "block applied");
        log.push(block);
        Ok(())
    }

    fn apply_tx(&self, tx: &mut Transaction, total_fee: &mut u64) -> Result<(), BlockApplicationError> {
        vm::run(&tx.data, self.storage.as_ref())?;

        if !matches!(tx.inner, Inner::None) {
            let sender_addr = tx
                .from
                .as_ref()
                .map(|pk| pk.address())
                .ok_or(BlockApplicationError::NonceInvalid)?;
            let sender = self
                .storage
                .get_account(&sender_addr)
                .ok_or(BlockApplicationError::NonceInvalid)?;
            if sender.nonce.checked_add(1) != Some(tx.nonce) {
                return Err(BlockApplicationError::NonceInvalid);
            }
        }

        match &tx.inner {
            Inner::None => {}
            Inner::Transfer { from, to, value, .. } => {
                self.apply_transfer(tx, *from, *to, *value)?;
            }
            Inner::Mint { .. } => {
                self.apply_mint(tx)?;
            }
        }

        if !matches!(tx.inner, Inner::None) {
            if let Some(pk) = &tx.from {
                self.storage.increase_account_nonce(&pk.address())?;
            }
        }

        *total_fee = total_fee
            .checked_add(tx.fee)
            .ok_or(BlockApplicationError::TypeInvalid)?;
        Ok(())
    }

    fn apply_transfer(
        &self,
        tx: &mut Transaction,
        from: Address,
        to: Address,
        value: u64,
    ) -> Result<(), BlockApplicationError> {
        let from_state = self
            .storage
            .get_account(&from)
            .ok_or(BlockApplicationError::NonceInvalid)?;
        let total = value
            .checked_add(tx.fee)
            .ok_or(BlockApplicationError::TypeInvalid)?;
        if from_state.balance < total {
            return Err(BlockApplicationError::InsufficientBalance);
        }
        let hash = tx.hash();
        self.storage.put_transfer(hash, tx.clone())?;
        self.storage.update_account_balance(&from, -(total as i64))?;
        self.storage.update_account_balance(&to, value as i64)?;
        Ok(())
    }

    fn apply_mint(&self, tx: &mut Transaction) -> Result<(), BlockApplicationError> {
        let hash = tx
            .inner
            .mint_hash()
            .expect("apply_mint only called for Inner::Mint");
        match &tx.inner {
            Inner::Mint {
                nft: NftPayload::Asset {
                    type_,
                    data,
                    collection,
                },
                ..
            } => {
                self.storage.put_nft(
                    hash,
                    NftAsset {
                        type_: type_.clone(),
                        data: data.clone(),
                        collection: *collection,
                    },
                )?;
            }
            Inner::Mint {
                nft: NftPayload::Collection { type_ },
                ..
            } => {
                self.storage.put_collection(
                    hash,
                    NftCollection {
                        type_: type_.clone(),
                    },
                )?;
            }
            _ => unreachable!("apply_mint only called for Inner::Mint"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::storage::InMemoryStorage;
    use rand::rngs::OsRng;

    fn coinbase_genesis(value: u64) -> Block {
        let coinbase_tx = Transaction::new(
            Inner::Transfer {
                signer: None,
                sig: None,
                from: Address::COINBASE,
                to: Address::COINBASE,
                value,
            },
            Vec::new(),
            0,
            0,
        );
        Block::genesis(vec![coinbase_tx])
    }

    fn next_block(parent: &mut Block, txs: Vec<Transaction>, key: &PrivateKey) -> Block {
        let mut block = Block::new(
            Header {
                version: 1,
                prev_block_hash: parent.hash(),
                data_hash: Hash::ZERO,
                height: parent.header.height + 1,
                timestamp: 1,
            },
            txs,
        );
        block.refresh_data_hash();
        block.sign(key);
        block
    }

    fn transfer(from_key: &PrivateKey, to: Address, value: u64, fee: u64, nonce: u64) -> Transaction {
        let mut tx = Transaction::new(
            Inner::Transfer {
                signer: None,
                sig: None,
                from: from_key.public().address(),
                to,
                value,
            },
            Vec::new(),
            nonce,
            fee,
        );
        tx.sign(from_key);
        tx
    }

    #[test]
    fn insufficient_transfer_leaves_balances_untouched() {
        let storage = Arc::new(InMemoryStorage::new());
        let mut genesis = coinbase_genesis(1_000_000);
        let bob = PrivateKey::generate(&mut OsRng);
        let alice = PrivateKey::generate(&mut OsRng);
        storage.put_new_account(bob.public().address()).unwrap();
        storage.put_new_account(alice.public().address()).unwrap();

        let validator = PrivateKey::generate(&mut OsRng);
        let chain = Chain::new(genesis.clone(), storage.clone());
        let block = next_block(
            &mut genesis,
            vec![transfer(&bob, alice.public().address(), 100, 0, 1)],
            &validator,
        );

        let err = chain.add_block(block).unwrap_err();
        assert_eq!(
            err,
            ChainError::Application(BlockApplicationError::InsufficientBalance)
        );
        let bob_state = storage.get_account(&bob.public().address()).unwrap();
        assert_eq!(bob_state.balance, 0);
        assert_eq!(bob_state.nonce, 0);
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn successful_transfer_updates_balances_and_credits_validator() {
        let storage = Arc::new(InMemoryStorage::new());
        let mut genesis = coinbase_genesis(1_000_000);
        let bob = PrivateKey::generate(&mut OsRng);
        let alice = PrivateKey::generate(&mut OsRng);
        storage.put_new_account(bob.public().address()).unwrap();
        storage.put_new_account(alice.public().address()).unwrap();
        storage.update_account_balance(&bob.public().address(), 1000).unwrap();

        let validator = PrivateKey::generate(&mut OsRng);
        let chain = Chain::new(genesis.clone(), storage.clone());
        let block = next_block(
            &mut genesis,
            vec![transfer(&bob, alice.public().address(), 100, 200, 1)],
            &validator,
        );

        chain.add_block(block).unwrap();
        assert_eq!(storage.get_account(&bob.public().address()).unwrap().balance, 700);
        assert_eq!(storage.get_account(&bob.public().address()).unwrap().nonce, 1);
        assert_eq!(storage.get_account(&alice.public().address()).unwrap().balance, 100);
        assert_eq!(
            storage.get_account(&validator.public().address()).unwrap().balance,
            200
        );
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn chain_grows_and_rejects_out_of_order_heights() {
        let storage = Arc::new(InMemoryStorage::new());
        let genesis = Block::genesis(Vec::new());
        let chain = Chain::new(genesis.clone(), storage);
        let key = PrivateKey::generate(&mut OsRng);

        let mut parent = genesis.clone();
        for _ in 0..1000 {
            let block = next_block(&mut parent, Vec::new(), &key);
            parent = block.clone();
            chain.add_block(block).unwrap();
        }
        assert_eq!(chain.height(), 1000);

        let mut stale = next_block(&mut genesis.clone(), Vec::new(), &key);
        stale.header.height = 89;
        assert_eq!(chain.add_block(stale).unwrap_err(), ChainError::BlockAlreadyExists);

        let next = next_block(&mut parent, Vec::new(), &key);
        chain.add_block(next).unwrap();
        assert_eq!(chain.height(), 1001);
    }

    #[test]
    fn mint_asset_then_duplicate_is_rejected() {
        let storage = Arc::new(InMemoryStorage::new());
        let mut genesis = Block::genesis(Vec::new());
        let chain = Chain::new(genesis.clone(), storage.clone());
        let owner = PrivateKey::generate(&mut OsRng);
        storage.put_new_account(owner.public().address()).unwrap();

        let mut mint_tx = Transaction::new(
            Inner::Mint {
                owner: None,
                sig: None,
                nft: NftPayload::Asset {
                    type_: "art".into(),
                    data: vec![1, 2, 3],
                    collection: Hash::ZERO,
                },
                metadata: Vec::new(),
            },
            Vec::new(),
            1,
            0,
        );
        mint_tx.sign(&owner);
        let validator = PrivateKey::generate(&mut OsRng);
        let block = next_block(&mut genesis, vec![mint_tx.clone()], &validator);
        chain.add_block(block).unwrap();

        let mint_hash = mint_tx.inner.mint_hash().unwrap();
        assert!(storage.has_nft(&mint_hash));
    }

    #[test]
    fn soft_check_drops_tx_from_unknown_sender() {
        let storage = Arc::new(InMemoryStorage::new());
        let genesis = Block::genesis(Vec::new());
        let chain = Chain::new(genesis, storage);
        let bob = PrivateKey::generate(&mut OsRng);
        let tx = transfer(&bob, Address::from_bytes([9; 20]), 1, 0, 1);
        let drops = chain.soft_check(std::slice::from_ref(&tx));
        assert_eq!(drops.len(), 1);
    }
}
