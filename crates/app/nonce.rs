//! Pending-nonce tracker.
//!
//! Predicts the next admissible nonce per sender ahead of commit so
//! fee-payers can submit transaction sequences without waiting for each to
//! be mined. Each sender holds an ordered deque of in-flight nonces:
//! committed transactions trim it from the low end, failed ones cascade
//! from the high end (a failing nonce invalidates every higher one).

use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chain5j_common::types::Transaction;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct NonceEntry {
    nonce: u64,
    tx: Transaction,
}

/// Per-sender in-flight nonce queues under one shared lock. Operations on
/// a single sender's queue are serialized by the pool and app locks.
#[derive(Debug, Default)]
pub struct NonceTracker {
    inner: RwLock<HashMap<String, VecDeque<NonceEntry>>>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, VecDeque<NonceEntry>>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, VecDeque<NonceEntry>>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends an accepted transaction. Callers have already verified
    /// strict monotonicity; anything at or below the current top is stale
    /// and dropped silently.
    pub fn push(&self, tx: &Transaction) {
        let mut inner = self.write();
        let queue = inner.entry(tx.from().to_string()).or_default();
        if let Some(back) = queue.back() {
            if tx.nonce() <= back.nonce {
                trace!(sender = tx.from(), nonce = tx.nonce(), "stale nonce dropped");
                return;
            }
        }
        queue.push_back(NonceEntry {
            nonce: tx.nonce(),
            tx: tx.clone(),
        });
    }

    /// Highest in-flight nonce for `sender`, 0 when none; creates the
    /// sender's queue on first sight.
    pub fn cache_nonce(&self, sender: &str) -> u64 {
        let mut inner = self.write();
        let queue = inner.entry(sender.to_string()).or_default();
        queue.back().map(|entry| entry.nonce).unwrap_or_default()
    }

    /// Nonce the sender should use next, if anything is in flight.
    pub fn next_nonce(&self, sender: &str) -> Option<u64> {
        self.read()
            .get(sender)
            .and_then(|queue| queue.back())
            .map(|entry| entry.nonce + 1)
    }

    /// A transaction committed: erase strictly lower in-flight nonces,
    /// always keeping the final element as the high-watermark.
    pub fn delete_ok_tx(&self, tx: &Transaction) {
        debug!(hash = %tx.hash(), nonce = tx.nonce(), "delete ok tx");
        let mut inner = self.write();
        let Some(queue) = inner.get_mut(tx.from()) else {
            return;
        };
        while queue.len() > 1 {
            match queue.front() {
                Some(front) if front.nonce < tx.nonce() => {
                    queue.pop_front();
                }
                _ => break,
            }
        }
    }

    /// A transaction failed: erase every higher in-flight nonce, since
    /// strict ordering makes them unexecutable.
    pub fn delete_err_tx(&self, tx: &Transaction) {
        debug!(hash = %tx.hash(), nonce = tx.nonce(), "delete err tx");
        let mut inner = self.write();
        let Some(queue) = inner.get_mut(tx.from()) else {
            return;
        };
        while let Some(back) = queue.back() {
            if back.nonce > tx.nonce() {
                queue.pop_back();
            } else {
                break;
            }
        }
    }

    #[cfg(test)]
    fn nonces(&self, sender: &str) -> Vec<u64> {
        self.read()
            .get(sender)
            .map(|queue| queue.iter().map(|e| e.nonce).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn hashes(&self, sender: &str) -> Vec<chain5j_common::H256> {
        self.read()
            .get(sender)
            .map(|queue| queue.iter().map(|e| e.tx.hash()).collect())
            .unwrap_or_default()
    }
}
