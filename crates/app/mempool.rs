//! Bounded transaction pool.
//!
//! The pool only buffers: validation is delegated through [`AppRouter`] so
//! the pool never depends on the concrete application type. Entries are
//! keyed by transaction hash, bounded by capacity and aged out after a
//! lifetime. Expiry is treated as an error-free removal (low-watermark
//! prune of the nonce tracker); capacity eviction is treated as an error
//! (high-watermark cascade).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chain5j_common::H256;
use chain5j_common::types::{Transaction, TxPoolConfig};
use tracing::{debug, trace, warn};

use crate::error::{AppError, MempoolError};

/// Application surface the pool validates and reports through.
pub trait AppRouter: Send + Sync {
    /// Whether an application handles this transaction kind.
    fn supports(&self, tx_type: &str) -> bool;
    /// Full ingress validation; pushes the nonce tracker on success.
    fn validate_tx(&self, tx: &Transaction) -> Result<(), AppError>;
    /// Light re-validation against the current head, used at fetch time.
    fn revalidate_tx(&self, tx: &Transaction) -> Result<(), AppError>;
    fn delete_ok_tx(&self, tx: &Transaction);
    fn delete_err_tx(&self, tx: &Transaction);
}

struct PoolEntry {
    tx: Transaction,
    added_at: Instant,
}

#[derive(Default)]
struct TxPoolInner {
    entries: HashMap<String, PoolEntry>,
    order: VecDeque<String>,
}

fn pool_key(hash: &H256) -> String {
    format!("{hash:#x}")
}

/// Hash-keyed transaction buffer serving ordered batches to the packer.
pub struct TxPool {
    inner: RwLock<TxPoolInner>,
    config: TxPoolConfig,
    router: Arc<dyn AppRouter>,
}

impl TxPool {
    pub fn new(config: TxPoolConfig, router: Arc<dyn AppRouter>) -> Self {
        TxPool {
            inner: RwLock::new(TxPoolInner::default()),
            config,
            router,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, TxPoolInner>, MempoolError> {
        self.inner
            .read()
            .map_err(|e| MempoolError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, TxPoolInner>, MempoolError> {
        self.inner
            .write()
            .map_err(|e| MempoolError::LockPoisoned(e.to_string()))
    }

    /// Admits a transaction. `peer` is `None` for local (RPC) submissions.
    ///
    /// A transiently invalid transaction (nonce running ahead) is buffered
    /// anyway: it is waiting for its predecessors and gets another look at
    /// fetch time.
    pub fn add(&self, peer: Option<&str>, tx: Transaction) -> Result<(), MempoolError> {
        let flag = if peer.is_some() { "p2p" } else { "rpc" };
        if !self.router.supports(tx.tx_type()) {
            debug!(flag, tx_type = tx.tx_type(), "unsupported tx type");
            return Err(MempoolError::TxType);
        }
        self.purge_expired()?;

        let key = pool_key(&tx.hash());
        {
            let inner = self.read()?;
            if inner.entries.contains_key(&key) {
                debug!(flag, hash = %tx.hash(), sender = tx.from(), nonce = tx.nonce(), "duplicate tx");
                return Err(MempoolError::TxDuplicate);
            }
            if inner.entries.len() >= self.config.capacity {
                return Err(MempoolError::PoolFull);
            }
        }

        match self.router.validate_tx(&tx) {
            Ok(()) => {}
            Err(err) if err.is_transient() => {
                debug!(flag, hash = %tx.hash(), nonce = tx.nonce(), %err, "buffering tx awaiting predecessors");
            }
            Err(err) => {
                debug!(flag, hash = %tx.hash(), sender = tx.from(), nonce = tx.nonce(), %err, "validate tx failed");
                return Err(err.into());
            }
        }

        let mut inner = self.write()?;
        if inner.entries.len() >= self.config.capacity {
            return Err(MempoolError::PoolFull);
        }
        // Prune the order queue once it has outgrown the live entries.
        if inner.order.len() > self.config.capacity + self.config.capacity / 2 {
            let entries = std::mem::take(&mut inner.entries);
            inner.order.retain(|key| entries.contains_key(key));
            inner.entries = entries;
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            PoolEntry {
                tx,
                added_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Collects up to `limit` currently executable transactions, sorted by
    /// the per-sender nonce/price order. Entries invalidated by the new
    /// head are dropped; gapped entries stay buffered.
    pub fn fetch_txs(
        &self,
        limit: usize,
        header_timestamp: u64,
    ) -> Result<Vec<Transaction>, MempoolError> {
        self.purge_expired()?;
        let candidates: Vec<Transaction> = self
            .read()?
            .entries
            .values()
            .map(|entry| entry.tx.clone())
            .collect();

        let mut ready = Vec::new();
        let mut dropped = Vec::new();
        for tx in candidates {
            if tx.deadline() != 0 && tx.deadline() < header_timestamp {
                trace!(hash = %tx.hash(), "deadline passed");
                dropped.push(tx);
                continue;
            }
            match self.router.revalidate_tx(&tx) {
                Ok(()) => ready.push(tx),
                Err(err) if err.is_transient() => {}
                Err(err) => {
                    debug!(hash = %tx.hash(), %err, "dropping stale tx");
                    dropped.push(tx);
                }
            }
        }
        for tx in &dropped {
            self.remove_entry(tx, false)?;
        }

        ready.sort_by(|a, b| {
            if a.less(b) {
                std::cmp::Ordering::Less
            } else if b.less(a) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        ready.truncate(limit);
        Ok(ready)
    }

    /// Removes a transaction; `no_err` selects the error-free bookkeeping
    /// path (commit success) over the failure cascade.
    pub fn delete(&self, tx: &Transaction, no_err: bool) -> Result<(), MempoolError> {
        self.remove_entry(tx, no_err)
    }

    /// Re-admits transactions the packer fetched but abandoned.
    pub fn fallback(&self, txs: Vec<Transaction>) -> Result<(), MempoolError> {
        for tx in txs {
            match self.add(None, tx.clone()) {
                Ok(()) => {}
                Err(MempoolError::PoolFull) => {
                    self.evict_oldest()?;
                    if let Err(err) = self.add(None, tx) {
                        warn!(%err, "fallback re-admission failed");
                    }
                }
                Err(err) => trace!(%err, "fallback skipped tx"),
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.read()
            .map(|inner| inner.entries.contains_key(&pool_key(hash)))
            .unwrap_or(false)
    }

    /// Every buffered transaction, for pool inspection endpoints.
    pub fn content(&self) -> Result<Vec<Transaction>, MempoolError> {
        Ok(self
            .read()?
            .entries
            .values()
            .map(|entry| entry.tx.clone())
            .collect())
    }

    fn remove_entry(&self, tx: &Transaction, no_err: bool) -> Result<(), MempoolError> {
        let removed = {
            let mut inner = self.write()?;
            inner.entries.remove(&pool_key(&tx.hash())).is_some()
        };
        if removed {
            if no_err {
                self.router.delete_ok_tx(tx);
            } else {
                self.router.delete_err_tx(tx);
            }
        }
        Ok(())
    }

    /// Lifetime-based eviction: aged entries leave through the error-free
    /// path, the nonce queue keeps its watermark.
    fn purge_expired(&self) -> Result<(), MempoolError> {
        let expired: Vec<Transaction> = {
            let inner = self.read()?;
            inner
                .entries
                .values()
                .filter(|entry| entry.added_at.elapsed() > self.config.lifetime)
                .map(|entry| entry.tx.clone())
                .collect()
        };
        for tx in &expired {
            trace!(hash = %tx.hash(), "pool entry expired");
            self.remove_entry(tx, true)?;
        }
        Ok(())
    }

    /// Capacity-based eviction: the victim leaves through the error path
    /// so its sender's higher nonces cascade out of the tracker.
    fn evict_oldest(&self) -> Result<(), MempoolError> {
        loop {
            let oldest = {
                let mut inner = self.write()?;
                match inner.order.pop_front() {
                    Some(key) => inner.entries.get(&key).map(|entry| entry.tx.clone()),
                    None => {
                        warn!("pool is full but the order queue is empty");
                        return Ok(());
                    }
                }
            };
            if let Some(tx) = oldest {
                self.remove_entry(&tx, false)?;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chain5j_common::U256;
    use chain5j_common::types::BASE_INTERPRETER;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockRouter {
        reject_over: Option<u64>,
        ok_deleted: Mutex<Vec<u64>>,
        err_deleted: Mutex<Vec<u64>>,
    }

    impl AppRouter for MockRouter {
        fn supports(&self, tx_type: &str) -> bool {
            tx_type == "STATE"
        }

        fn validate_tx(&self, tx: &Transaction) -> Result<(), AppError> {
            match self.reject_over {
                Some(bound) if tx.nonce() > bound => Err(AppError::NonceTooHigh),
                _ => Ok(()),
            }
        }

        fn revalidate_tx(&self, tx: &Transaction) -> Result<(), AppError> {
            self.validate_tx(tx)
        }

        fn delete_ok_tx(&self, tx: &Transaction) {
            self.ok_deleted
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(tx.nonce());
        }

        fn delete_err_tx(&self, tx: &Transaction) {
            self.err_deleted
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(tx.nonce());
        }
    }

    fn tx(nonce: u64) -> Transaction {
        tx_with_deadline(nonce, 0)
    }

    fn tx_with_deadline(nonce: u64, deadline: u64) -> Transaction {
        Transaction::new(
            "alice@root",
            "bob@root",
            BASE_INTERPRETER,
            nonce,
            0,
            21_000,
            U256::zero(),
            Bytes::new(),
            deadline,
            Bytes::new(),
        )
    }

    fn pool(capacity: usize, router: Arc<MockRouter>) -> TxPool {
        let config = TxPoolConfig {
            capacity,
            lifetime: Duration::from_secs(600),
            price_bump: 10,
        };
        TxPool::new(config, router)
    }

    #[test]
    fn duplicates_are_rejected() {
        let pool = pool(10, Arc::new(MockRouter::default()));
        pool.add(None, tx(0)).expect("first");
        assert!(matches!(
            pool.add(None, tx(0)),
            Err(MempoolError::TxDuplicate)
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn capacity_is_a_hard_bound() {
        let pool = pool(3, Arc::new(MockRouter::default()));
        for nonce in 0..3 {
            pool.add(None, tx(nonce)).expect("capacity");
        }
        assert!(matches!(pool.add(None, tx(3)), Err(MempoolError::PoolFull)));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn transient_failures_are_buffered() {
        let router = Arc::new(MockRouter {
            reject_over: Some(1),
            ..Default::default()
        });
        let pool = pool(10, router);
        pool.add(None, tx(0)).expect("ok");
        pool.add(None, tx(1)).expect("ok");
        // Nonce 3 is ahead of the queue but stays buffered.
        pool.add(None, tx(3)).expect("transient keeps tx");
        assert_eq!(pool.len(), 3);

        let fetched = pool.fetch_txs(10, 0).expect("fetch");
        let nonces: Vec<u64> = fetched.iter().map(Transaction::nonce).collect();
        assert_eq!(nonces, vec![0, 1]);
        // Still buffered for a later fetch.
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn fetch_respects_limit_and_order() {
        let pool = pool(10, Arc::new(MockRouter::default()));
        for nonce in [4u64, 1, 3, 0, 2] {
            pool.add(None, tx(nonce)).expect("add");
        }
        let fetched = pool.fetch_txs(3, 0).expect("fetch");
        let nonces: Vec<u64> = fetched.iter().map(Transaction::nonce).collect();
        assert_eq!(nonces, vec![0, 1, 2]);
    }

    #[test]
    fn deadline_expired_txs_drop_on_fetch() {
        let router = Arc::new(MockRouter::default());
        let pool = pool(10, router.clone());
        pool.add(None, tx_with_deadline(0, 50)).expect("add");
        pool.add(None, tx(1)).expect("add");
        let fetched = pool.fetch_txs(10, 100).expect("fetch");
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].nonce(), 1);
        // The expired entry left through the error path.
        assert_eq!(
            *router.err_deleted.lock().unwrap_or_else(|e| e.into_inner()),
            vec![0]
        );
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn delete_routes_by_outcome() {
        let router = Arc::new(MockRouter::default());
        let pool = pool(10, router.clone());
        pool.add(None, tx(0)).expect("add");
        pool.add(None, tx(1)).expect("add");
        pool.delete(&tx(0), true).expect("delete ok");
        pool.delete(&tx(1), false).expect("delete err");
        assert!(pool.is_empty());
        assert_eq!(
            *router.ok_deleted.lock().unwrap_or_else(|e| e.into_inner()),
            vec![0]
        );
        assert_eq!(
            *router.err_deleted.lock().unwrap_or_else(|e| e.into_inner()),
            vec![1]
        );
    }

    #[test]
    fn lifetime_expiry_purges_entries() {
        let router = Arc::new(MockRouter::default());
        let config = TxPoolConfig {
            capacity: 10,
            lifetime: Duration::from_millis(1),
            price_bump: 10,
        };
        let pool = TxPool::new(config, router.clone());
        pool.add(None, tx(0)).expect("add");
        std::thread::sleep(Duration::from_millis(5));
        let fetched = pool.fetch_txs(10, 0).expect("fetch");
        assert!(fetched.is_empty());
        assert!(pool.is_empty());
        // Expiry uses the error-free path.
        assert_eq!(
            *router.ok_deleted.lock().unwrap_or_else(|e| e.into_inner()),
            vec![0]
        );
    }

    #[test]
    fn fallback_readmits_fetched_txs() {
        let pool = pool(10, Arc::new(MockRouter::default()));
        for nonce in 0..4 {
            pool.add(None, tx(nonce)).expect("add");
        }
        let fetched = pool.fetch_txs(10, 0).expect("fetch");
        for tx in &fetched {
            pool.delete(tx, true).expect("delete");
        }
        assert!(pool.is_empty());
        pool.fallback(fetched[..2].to_vec()).expect("fallback");
        assert_eq!(pool.len(), 2);
    }
}
