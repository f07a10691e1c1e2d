//! Versioned state and block storage for the chain5j state application.
//!
//! The [`Store`] is a thread-safe facade over an in-memory engine holding:
//! - account state snapshots addressed by root hash (both the native
//!   `cn@domain` model and the EVM-address model share a snapshot),
//! - headers and the canonical chain,
//! - receipts keyed by block hash.
//!
//! The production trie engine lives behind this same interface; the
//! in-memory engine computes roots as a digest over the canonically
//! encoded snapshot, which keeps root derivation deterministic for a given
//! account state.

pub mod error;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chain5j_common::crypto::keccak;
use chain5j_common::types::{
    AccountStore, Block, BlockHeader, DomainStore, Receipt, STATE_SECTION, StateRoots,
};
use chain5j_common::{Address, H256, U256};
use error::StoreError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Balance and nonce of an account in the EVM-address state model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthAccount {
    pub balance: U256,
    pub nonce: u64,
}

/// Full account state at one root.
///
/// Maps are ordered so the encoded form, and therefore the derived root,
/// is independent of insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub accounts: BTreeMap<String, AccountStore>,
    pub domains: BTreeMap<String, DomainStore>,
    /// Every address bound to any account, for global-uniqueness checks.
    pub address_index: BTreeSet<Address>,
    pub eth_accounts: BTreeMap<Address, EthAccount>,
}

#[derive(Debug, Default)]
struct StoreInner {
    snapshots: HashMap<H256, StateSnapshot>,
    headers: HashMap<H256, BlockHeader>,
    canonical: HashMap<u64, H256>,
    latest: Option<Block>,
    receipts: HashMap<H256, Vec<Receipt>>,
}

/// Thread-safe storage handle; clones share the same engine.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<StoreInner>>,
}

impl Store {
    /// Creates a store seeded with an empty genesis state and block.
    pub fn new() -> Result<Self, StoreError> {
        Self::with_genesis_state(StateSnapshot::default())
    }

    /// Creates a store whose genesis block commits to `snapshot`.
    pub fn with_genesis_state(snapshot: StateSnapshot) -> Result<Self, StoreError> {
        let store = Store {
            inner: Arc::new(RwLock::new(StoreInner::default())),
        };
        let root = store.commit_state(snapshot)?;
        let mut roots = StateRoots::new();
        roots.set(STATE_SECTION, root);
        let genesis = Block::new(
            BlockHeader {
                state_roots: roots.encode(),
                ..Default::default()
            },
            Vec::new(),
        );
        store.add_block(genesis)?;
        Ok(store)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>, StoreError> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>, StoreError> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Root a snapshot would commit to, without persisting it.
    pub fn compute_root(snapshot: &StateSnapshot) -> H256 {
        // BTreeMap ordering makes the encoding canonical.
        keccak(serde_json::to_vec(snapshot).unwrap_or_default())
    }

    /// Persists a snapshot and returns its root.
    pub fn commit_state(&self, snapshot: StateSnapshot) -> Result<H256, StoreError> {
        let root = Self::compute_root(&snapshot);
        self.write()?.snapshots.insert(root, snapshot);
        debug!(root = %root, "state committed");
        Ok(root)
    }

    /// State at `root`. The zero root reads as the empty state.
    pub fn state_at(&self, root: H256) -> Result<StateSnapshot, StoreError> {
        if root.is_zero() {
            return Ok(StateSnapshot::default());
        }
        self.read()?
            .snapshots
            .get(&root)
            .cloned()
            .ok_or(StoreError::UnknownStateRoot(root))
    }

    /// Stores a block as the new canonical head.
    pub fn add_block(&self, block: Block) -> Result<(), StoreError> {
        let hash = block.hash();
        let mut inner = self.write()?;
        inner.headers.insert(hash, block.header.clone());
        inner.canonical.insert(block.header.height, hash);
        let is_new_head = inner
            .latest
            .as_ref()
            .map(|current| block.header.height >= current.header.height)
            .unwrap_or(true);
        if is_new_head {
            inner.latest = Some(block);
        }
        Ok(())
    }

    pub fn current_block(&self) -> Result<Block, StoreError> {
        self.read()?.latest.clone().ok_or(StoreError::EmptyChain)
    }

    pub fn get_header_by_height(&self, height: u64) -> Result<Option<BlockHeader>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .canonical
            .get(&height)
            .and_then(|hash| inner.headers.get(hash))
            .cloned())
    }

    pub fn get_header_by_hash(&self, hash: H256) -> Result<Option<BlockHeader>, StoreError> {
        Ok(self.read()?.headers.get(&hash).cloned())
    }

    /// True when `hash` is the canonical block at its height.
    pub fn is_canonical(&self, hash: H256) -> Result<bool, StoreError> {
        let inner = self.read()?;
        let Some(header) = inner.headers.get(&hash) else {
            return Ok(false);
        };
        Ok(inner.canonical.get(&header.height) == Some(&hash))
    }

    pub fn write_receipts(
        &self,
        block_hash: H256,
        height: u64,
        receipts: Vec<Receipt>,
    ) -> Result<(), StoreError> {
        debug!(block = %block_hash, height, count = receipts.len(), "receipts stored");
        self.write()?.receipts.insert(block_hash, receipts);
        Ok(())
    }

    pub fn get_receipts(&self, block_hash: H256) -> Result<Vec<Receipt>, StoreError> {
        Ok(self
            .read()?
            .receipts
            .get(&block_hash)
            .cloned()
            .unwrap_or_default())
    }
}
