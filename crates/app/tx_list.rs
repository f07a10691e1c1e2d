//! Per-sender candidate list: a nonce-keyed map with a min-heap index and
//! a lazily rebuilt sorted cache. In strict mode, removing a transaction
//! also drops every higher nonce so no gap can form.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use chain5j_common::U256;
use chain5j_common::types::Transaction;

/// Nonce-sorted transaction map.
#[derive(Default)]
pub struct TxSortedMap {
    items: HashMap<u64, Transaction>,
    index: BinaryHeap<Reverse<u64>>,
    cache: Option<Vec<Transaction>>,
}

impl TxSortedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, nonce: u64) -> Option<&Transaction> {
        self.items.get(&nonce)
    }

    pub fn put(&mut self, tx: Transaction) {
        let nonce = tx.nonce();
        if !self.items.contains_key(&nonce) {
            self.index.push(Reverse(nonce));
        }
        self.items.insert(nonce, tx);
        self.cache = None;
    }

    /// Removes and returns every transaction with a nonce below
    /// `threshold`.
    pub fn forward(&mut self, threshold: u64) -> Vec<Transaction> {
        let mut removed = Vec::new();
        while let Some(&Reverse(nonce)) = self.index.peek() {
            if nonce >= threshold {
                break;
            }
            self.index.pop();
            if let Some(tx) = self.items.remove(&nonce) {
                removed.push(tx);
            }
        }
        if let Some(cache) = &mut self.cache {
            cache.drain(..removed.len().min(cache.len()));
        }
        removed
    }

    /// Removes and returns every transaction matching the predicate.
    pub fn filter(&mut self, predicate: impl Fn(&Transaction) -> bool) -> Vec<Transaction> {
        let mut removed = Vec::new();
        self.items.retain(|_, tx| {
            if predicate(tx) {
                removed.push(tx.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            self.index = self.items.keys().map(|&nonce| Reverse(nonce)).collect();
            self.cache = None;
        }
        removed
    }

    /// Retains the `threshold` lowest nonces, returning the dropped rest.
    pub fn cap(&mut self, threshold: usize) -> Vec<Transaction> {
        if self.items.len() <= threshold {
            return Vec::new();
        }
        let mut nonces: Vec<u64> = self.items.keys().copied().collect();
        nonces.sort_unstable();
        let mut drops = Vec::new();
        for &nonce in nonces.iter().skip(threshold).rev() {
            if let Some(tx) = self.items.remove(&nonce) {
                drops.push(tx);
            }
        }
        self.index = nonces[..threshold].iter().map(|&n| Reverse(n)).collect();
        if let Some(cache) = &mut self.cache {
            cache.truncate(cache.len().saturating_sub(drops.len()));
        }
        drops
    }

    pub fn remove(&mut self, nonce: u64) -> bool {
        if self.items.remove(&nonce).is_none() {
            return false;
        }
        self.index = self.items.keys().map(|&n| Reverse(n)).collect();
        self.cache = None;
        true
    }

    /// Pops a maximal contiguous run starting at the lowest queued nonce,
    /// provided that nonce does not exceed `start`. Entries below `start`
    /// are included rather than stranded.
    pub fn ready(&mut self, start: u64) -> Vec<Transaction> {
        match self.index.peek() {
            Some(&Reverse(lowest)) if lowest <= start => {}
            _ => return Vec::new(),
        }
        let mut ready = Vec::new();
        let mut next = match self.index.peek() {
            Some(&Reverse(lowest)) => lowest,
            None => return Vec::new(),
        };
        while let Some(&Reverse(nonce)) = self.index.peek() {
            if nonce != next {
                break;
            }
            self.index.pop();
            if let Some(tx) = self.items.remove(&nonce) {
                ready.push(tx);
            }
            next += 1;
        }
        self.cache = None;
        ready
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Nonce-then-price sorted copy of the list, cached until mutation.
    pub fn flatten(&mut self) -> Vec<Transaction> {
        if self.cache.is_none() {
            let mut txs: Vec<Transaction> = self.items.values().cloned().collect();
            txs.sort_by(|a, b| {
                if a.less(b) {
                    std::cmp::Ordering::Less
                } else if b.less(a) {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            });
            self.cache = Some(txs);
        }
        self.cache.clone().unwrap_or_default()
    }
}

/// Sender-scoped list with replacement pricing and cost/gas caps.
pub struct TxList {
    /// In strict mode nonces must stay gap-free: removals cascade upward.
    strict: bool,
    txs: TxSortedMap,
    cost_cap: U256,
    gas_cap: u64,
}

impl TxList {
    pub fn new(strict: bool) -> Self {
        TxList {
            strict,
            txs: TxSortedMap::new(),
            cost_cap: U256::zero(),
            gas_cap: 0,
        }
    }

    pub fn overlaps(&self, tx: &Transaction) -> bool {
        self.txs.get(tx.nonce()).is_some()
    }

    /// Inserts `tx`, replacing a same-nonce entry only when the new gas
    /// price beats the old one by at least `price_bump` percent.
    pub fn add(&mut self, tx: Transaction, price_bump: u64) -> (bool, Option<Transaction>) {
        let old = self.txs.get(tx.nonce()).cloned();
        if let Some(old_tx) = &old {
            let threshold = (old_tx.gas_price() * (100 + price_bump)).div_ceil(100);
            if old_tx.gas_price() >= tx.gas_price() || tx.gas_price() < threshold {
                return (false, None);
            }
        }
        if tx.cost() > self.cost_cap {
            self.cost_cap = tx.cost();
        }
        if tx.gas_limit() > self.gas_cap {
            self.gas_cap = tx.gas_limit();
        }
        self.txs.put(tx);
        (true, old)
    }

    pub fn forward(&mut self, threshold: u64) -> Vec<Transaction> {
        self.txs.forward(threshold)
    }

    /// Drops every transaction whose cost or gas exceeds the limits.
    /// In strict mode, also drops (as `invalids`) everything above the
    /// lowest removed nonce.
    pub fn filter(
        &mut self,
        cost_limit: U256,
        gas_limit: u64,
    ) -> (Vec<Transaction>, Vec<Transaction>) {
        if self.cost_cap <= cost_limit && self.gas_cap <= gas_limit {
            return (Vec::new(), Vec::new());
        }
        self.cost_cap = cost_limit;
        self.gas_cap = gas_limit;

        let removed = self
            .txs
            .filter(|tx| tx.cost() > cost_limit || tx.gas_limit() > gas_limit);

        let mut invalids = Vec::new();
        if self.strict && !removed.is_empty() {
            let lowest = removed
                .iter()
                .map(Transaction::nonce)
                .min()
                .unwrap_or(u64::MAX);
            invalids = self.txs.filter(|tx| tx.nonce() > lowest);
        }
        (removed, invalids)
    }

    pub fn cap(&mut self, threshold: usize) -> Vec<Transaction> {
        self.txs.cap(threshold)
    }

    /// Removes a transaction by nonce; in strict mode returns the higher
    /// nonces invalidated by the gap.
    pub fn remove(&mut self, tx: &Transaction) -> (bool, Vec<Transaction>) {
        let nonce = tx.nonce();
        if !self.txs.remove(nonce) {
            return (false, Vec::new());
        }
        if self.strict {
            return (true, self.txs.filter(|queued| queued.nonce() > nonce));
        }
        (true, Vec::new())
    }

    pub fn ready(&mut self, start: u64) -> Vec<Transaction> {
        self.txs.ready(start)
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn flatten(&mut self) -> Vec<Transaction> {
        self.txs.flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chain5j_common::types::BASE_INTERPRETER;

    fn tx(nonce: u64, gas_price: u64) -> Transaction {
        Transaction::new(
            "alice@root",
            "bob@root",
            BASE_INTERPRETER,
            nonce,
            gas_price,
            21_000,
            U256::from(1),
            Bytes::new(),
            0,
            Bytes::new(),
        )
    }

    #[test]
    fn replacement_needs_a_real_price_bump() {
        let mut list = TxList::new(true);
        assert!(list.add(tx(0, 100), 10).0);

        // 105 < ceil(100 * 110 / 100): still underpriced.
        let (inserted, _) = list.add(tx(0, 105), 10);
        assert!(!inserted);
        assert_eq!(
            list.flatten().first().map(Transaction::gas_price),
            Some(100)
        );

        let (inserted, old) = list.add(tx(0, 110), 10);
        assert!(inserted);
        assert_eq!(old.map(|tx| tx.gas_price()), Some(100));
    }

    #[test]
    fn equal_price_never_replaces() {
        let mut list = TxList::new(false);
        list.add(tx(0, 0), 10);
        assert!(!list.add(tx(0, 0), 10).0);
    }

    #[test]
    fn forward_is_idempotent() {
        let mut list = TxList::new(true);
        for nonce in 0..6 {
            list.add(tx(nonce, 1), 10);
        }
        let first = list.forward(3);
        assert_eq!(
            first.iter().map(Transaction::nonce).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(list.forward(3).is_empty());
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn strict_filter_cascades_above_lowest_removed() {
        let mut list = TxList::new(true);
        for nonce in 0..5 {
            // Nonce 2 carries a much larger gas limit.
            let gas_limit = if nonce == 2 { 100_000 } else { 21_000 };
            let tx = Transaction::new(
                "alice@root",
                "bob@root",
                BASE_INTERPRETER,
                nonce,
                1,
                gas_limit,
                U256::from(1),
                Bytes::new(),
                0,
                Bytes::new(),
            );
            list.add(tx, 10);
        }
        let (removed, invalids) = list.filter(U256::MAX, 50_000);
        assert_eq!(
            removed.iter().map(Transaction::nonce).collect::<Vec<_>>(),
            vec![2]
        );
        let mut invalid_nonces: Vec<u64> = invalids.iter().map(Transaction::nonce).collect();
        invalid_nonces.sort_unstable();
        assert_eq!(invalid_nonces, vec![3, 4]);
        // Nothing above the gap survives.
        assert!(list.flatten().iter().all(|tx| tx.nonce() < 2));
    }

    #[test]
    fn cap_keeps_the_lowest_nonces() {
        let mut list = TxList::new(false);
        for nonce in 0..8 {
            list.add(tx(nonce, 1), 10);
        }
        let drops = list.cap(5);
        assert_eq!(drops.len(), 3);
        assert!(list.flatten().iter().all(|tx| tx.nonce() < 5));
    }

    #[test]
    fn ready_pops_a_contiguous_prefix() {
        let mut list = TxList::new(true);
        for nonce in [0u64, 1, 2, 4, 5] {
            list.add(tx(nonce, 1), 10);
        }
        let ready = list.ready(0);
        assert_eq!(
            ready.iter().map(Transaction::nonce).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        // The gap at 3 blocks the rest.
        assert!(list.ready(3).is_empty());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn remove_in_strict_mode_invalidates_higher_nonces() {
        let mut list = TxList::new(true);
        for nonce in 0..4 {
            list.add(tx(nonce, 1), 10);
        }
        let (removed, invalids) = list.remove(&tx(1, 1));
        assert!(removed);
        let mut nonces: Vec<u64> = invalids.iter().map(Transaction::nonce).collect();
        nonces.sort_unstable();
        assert_eq!(nonces, vec![2, 3]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn flatten_orders_by_nonce_then_price() {
        let mut list = TxList::new(false);
        list.add(tx(2, 5), 10);
        list.add(tx(0, 1), 10);
        list.add(tx(1, 9), 10);
        let flat = list.flatten();
        assert_eq!(
            flat.iter().map(Transaction::nonce).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }
}
