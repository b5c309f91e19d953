//! Five-stage mempool with a cooperative lock around block assembly.
//!
//! Grounded in `examples/original_source/pool/tx_pool.go` (`TxSortedMap`
//! backing `TxPool`, the `LockPending`/`UnlockPending`/`Denide`/`Processed`
//! sequence used by the validator loop) reworked per §9's design note:
//! the manual lock/unlock is encapsulated so every exit path releases it,
//! using `tokio::sync::Mutex`'s owned guard (`lock_owned`) to let the guard
//! outlive the `pending()` call that acquired it, the same shape the
//! teacher's async methods use elsewhere for cross-await state.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::hash::Hash;
use crate::tx::Transaction;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MempoolError {
    #[error("mempool is full")]
    PoolFull,
    #[error("unknown pool error")]
    UnknownPoolError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Processed,
    Denied,
    Expired,
    Unknown,
}

#[derive(Default)]
struct IndexedMap {
    order: Vec<Hash>,
    by_hash: HashMap<Hash, Transaction>,
}

impl IndexedMap {
    fn insert(&mut self, hash: Hash, tx: Transaction) {
        if !self.by_hash.contains_key(&hash) {
            self.order.push(hash);
        }
        self.by_hash.insert(hash, tx);
    }

    fn remove(&mut self, hash: &Hash) -> Option<Transaction> {
        let tx = self.by_hash.remove(hash)?;
        self.order.retain(|h| h != hash);
        Some(tx)
    }

    fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    fn get(&self, hash: &Hash) -> Option<Transaction> {
        self.by_hash.get(hash).cloned()
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn ordered(&self) -> Vec<Transaction> {
        self.order.iter().filter_map(|h| self.by_hash.get(h).cloned()).collect()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.by_hash.clear();
    }
}

/// A multi-stage transaction pool. `pending()` begins a critical section
/// that a matching call to `unlock_pending`/`denied`/`processed`/
/// `clear_pending` must end — see those methods' docs.
pub struct Mempool {
    max_len: usize,
    pending: std::sync::Arc<AsyncMutex<IndexedMap>>,
    pending_guard: StdMutex<Option<OwnedMutexGuard<IndexedMap>>>,
    denied: StdMutex<IndexedMap>,
    processed: StdMutex<IndexedMap>,
    expired: StdMutex<IndexedMap>,
}

impl Mempool {
    pub fn new(max_len: usize) -> Self {
        Mempool {
            max_len,
            pending: std::sync::Arc::new(AsyncMutex::new(IndexedMap::default())),
            pending_guard: StdMutex::new(None),
            denied: StdMutex::new(IndexedMap::default()),
            processed: StdMutex::new(IndexedMap::default()),
            expired: StdMutex::new(IndexedMap::default()),
        }
    }

    /// Inserts `tx` into the pending stage, keyed by its rehashed hash.
    /// Re-adding an identical hash is a no-op success. Blocks cooperatively
    /// if a validator tick currently holds the pending lock — this is the
    /// intended backpressure, not a bug.
    pub async fn add(&self, mut tx: Transaction) -> Result<(), MempoolError> {
        let hash = tx.rehash();
        let mut pending = self.pending.clone().lock_owned().await;
        if pending.contains(&hash) {
            return Ok(());
        }
        if pending.len() >= self.max_len {
            return Err(MempoolError::PoolFull);
        }
        pending.insert(hash, tx);
        Ok(())
    }

    pub async fn contains(&self, hash: &Hash) -> bool {
        self.pending.lock().await.contains(hash)
    }

    pub async fn get(&self, hash: &Hash) -> (Stage, Option<Transaction>) {
        if let Some(tx) = self.pending.lock().await.get(hash) {
            return (Stage::Pending, Some(tx));
        }
        if let Some(tx) = self.denied.lock().unwrap().get(hash) {
            return (Stage::Denied, Some(tx));
        }
        if let Some(tx) = self.processed.lock().unwrap().get(hash) {
            return (Stage::Processed, Some(tx));
        }
        if let Some(tx) = self.expired.lock().unwrap().get(hash) {
            return (Stage::Expired, Some(tx));
        }
        (Stage::Unknown, None)
    }

    /// Returns the pending list in insertion order, having first classified
    /// expired entries (`valid_until < now`, nonzero) into the Expired stage
    /// and dropped not-yet-valid entries (`valid_from > now`, nonzero) from
    /// the returned slice (they remain pending). Opens the critical section:
    /// the caller must release it via `unlock_pending`, `denied`,
    /// `processed`, or `clear_pending`.
    pub async fn pending(&self, now: i64) -> Vec<Transaction> {
        let mut guard = self.pending.clone().lock_owned().await;

        let expired_hashes: Vec<Hash> = guard
            .order
            .iter()
            .copied()
            .filter(|h| {
                guard
                    .by_hash
                    .get(h)
                    .map(|tx| tx.valid_until != 0 && tx.valid_until < now)
                    .unwrap_or(false)
            })
            .collect();
        let mut expired = self.expired.lock().unwrap();
        for h in expired_hashes {
            if let Some(tx) = guard.remove(&h) {
                expired.insert(h, tx);
            }
        }
        drop(expired);

        let result = guard
            .ordered()
            .into_iter()
            .filter(|tx| tx.valid_from == 0 || tx.valid_from <= now)
            .collect();

        *self.pending_guard.lock().unwrap() = Some(guard);
        result
    }

    /// Releases the pending lock without otherwise mutating state.
    pub fn unlock_pending(&self) {
        self.pending_guard.lock().unwrap().take();
    }

    /// Moves each listed hash from pending to denied, then releases the
    /// pending lock. Returns the moved transactions.
    pub fn denied(&self, hashes: &[Hash]) -> Vec<Transaction> {
        let mut guard = self
            .pending_guard
            .lock()
            .unwrap()
            .take()
            .expect("denied() called without a held pending lock");
        let mut denied = self.denied.lock().unwrap();
        let mut moved = Vec::new();
        for h in hashes {
            if let Some(tx) = guard.remove(h) {
                denied.insert(*h, tx.clone());
                moved.push(tx);
            }
        }
        moved
    }

    /// Moves each of `txs` from pending to processed, then releases the
    /// pending lock.
    pub fn processed(&self, txs: &[Transaction]) {
        let mut guard = self
            .pending_guard
            .lock()
            .unwrap()
            .take()
            .expect("processed() called without a held pending lock");
        let mut processed = self.processed.lock().unwrap();
        for tx in txs {
            let mut tx = tx.clone();
            let hash = tx.rehash();
            guard.remove(&hash);
            processed.insert(hash, tx);
        }
    }

    /// Empties the pending stage, then releases the pending lock.
    pub fn clear_pending(&self) {
        let mut guard = self
            .pending_guard
            .lock()
            .unwrap()
            .take()
            .expect("clear_pending() called without a held pending lock");
        guard.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::Inner;

    fn tx(nonce: u64) -> Transaction {
        Transaction::new(Inner::None, vec![nonce as u8], nonce, 0)
    }

    #[tokio::test]
    async fn pending_returns_insertion_order() {
        let pool = Mempool::new(10);
        let mut hashes = Vec::new();
        for n in 0..5 {
            let mut t = tx(n);
            hashes.push(t.rehash());
            pool.add(t).await.unwrap();
        }
        let pending = pool.pending(0).await;
        pool.unlock_pending();
        let got: Vec<Hash> = pending.into_iter().map(|mut t| t.rehash()).collect();
        assert_eq!(got, hashes);
    }

    #[tokio::test]
    async fn denied_removes_from_pending_and_tags_stage() {
        let pool = Mempool::new(10);
        let mut hashes = Vec::new();
        for n in 0..5 {
            let mut t = tx(n);
            hashes.push(t.rehash());
            pool.add(t).await.unwrap();
        }
        let _pending = pool.pending(0).await;
        pool.denied(&[hashes[1], hashes[3]]);

        let remaining = pool.pending(0).await;
        pool.unlock_pending();
        assert_eq!(remaining.len(), 3);

        let (stage, _) = pool.get(&hashes[1]).await;
        assert_eq!(stage, Stage::Denied);
    }

    #[tokio::test]
    async fn pool_full_rejects_new_entries() {
        let pool = Mempool::new(1);
        pool.add(tx(0)).await.unwrap();
        assert_eq!(pool.add(tx(1)).await, Err(MempoolError::PoolFull));
    }

    #[tokio::test]
    async fn readding_same_hash_is_noop_even_when_full() {
        let pool = Mempool::new(1);
        let t = tx(0);
        pool.add(t.clone()).await.unwrap();
        assert!(pool.add(t).await.is_ok());
    }

    #[tokio::test]
    async fn processed_moves_out_of_pending() {
        let pool = Mempool::new(10);
        let mut t = tx(0);
        let hash = t.rehash();
        pool.add(t.clone()).await.unwrap();
        let pending = pool.pending(0).await;
        pool.processed(&pending);
        let (stage, _) = pool.get(&hash).await;
        assert_eq!(stage, Stage::Processed);
    }
}
