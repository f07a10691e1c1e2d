//! # chain5j state application
//!
//! The state-application core of a permissioned chain5j node:
//! - ingress validation of signed state transactions,
//! - deterministic execution through pluggable interpreters,
//! - the pending-nonce tracker and the transaction pool,
//! - the two-phase Prepare/Commit block flow with receipt stamping.
//!
//! ## Block flow
//!
//! ```text
//! client → TxPool::add → Application::validate_tx → NonceTracker::push
//! packer → TxPool::fetch_txs → Application::prepare → tentative root
//! seal   → Application::commit → final root + stamped receipts
//! ```
//!
//! Prepare executes against a fresh [`interpreter::InterpreterCtx`] whose
//! receipts only learn the block hash at commit time; every transaction
//! runs under its own state snapshot so a failure rolls back cleanly.

pub mod api;
pub mod constants;
pub mod error;
pub mod interpreter;
pub mod interpreters;
pub mod mempool;
pub mod nonce;
pub mod portal;
pub mod state;
pub mod state_transition;
pub mod tx_list;
pub mod vm;

use std::sync::{Arc, RwLock};
use std::time::Instant;

use chain5j_common::H256;
use chain5j_common::crypto::domain_to_address;
use chain5j_common::types::{
    BlockHeader, ChainConfig, ETHEREUM_INTERPRETER, Receipt, STATE_TX_TYPE, Transaction,
};
use chain5j_storage::Store;
use tracing::{debug, error, trace};

use crate::error::AppError;
use crate::interpreter::{InterpreterCtx, InterpreterRegistry};
use crate::mempool::AppRouter;
use crate::nonce::NonceTracker;
use crate::portal::{NodeKey, NodePermission};
use crate::state::{EvmState, NativeState, StateView};
use crate::vm::Vm;

/// Mutable state scope for one Prepare/Commit cycle (or a read-mostly
/// validation pass), rooted at `pre_root`.
pub struct StateContext {
    caller: String,
    pre_root: H256,
    pub(crate) view: Box<dyn StateView>,
    receipts: Vec<Receipt>,
}

impl StateContext {
    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub fn pre_root(&self) -> H256 {
        self.pre_root
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }
}

/// Result of preparing a block: the tentative root plus the partition of
/// the input transactions.
#[derive(Debug)]
pub struct PrepareOutcome {
    pub state_root: H256,
    pub gas_used: u64,
    pub ok_txs: Vec<Transaction>,
    pub err_txs: Vec<Transaction>,
}

/// The state application. Owns the interpreter registry, the pending-nonce
/// tracker and the commit guard; routes every transaction by its
/// interpreter tag.
pub struct Application {
    storage: Store,
    config: ChainConfig,
    registry: InterpreterRegistry,
    nonce_tracker: NonceTracker,
    vm: Arc<dyn Vm>,
    commit_lock: RwLock<()>,
}

impl Application {
    pub fn new(
        storage: Store,
        config: ChainConfig,
        vm: Arc<dyn Vm>,
        permission: Arc<dyn NodePermission>,
        node_key: Arc<dyn NodeKey>,
    ) -> Self {
        let registry = InterpreterRegistry::new(vm.clone(), permission, node_key);
        Application {
            storage,
            config,
            registry,
            nonce_tracker: NonceTracker::new(),
            vm,
            commit_lock: RwLock::new(()),
        }
    }

    pub fn storage(&self) -> &Store {
        &self.storage
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub(crate) fn vm_handle(&self) -> Arc<dyn Vm> {
        self.vm.clone()
    }

    /// Opens a state scope at `root`, dispatching the back-end once; no
    /// downstream code branches on the chain mode.
    pub fn new_context(&self, caller: &str, root: H256) -> Result<StateContext, AppError> {
        trace!(caller, root = %root, "new context");
        let view: Box<dyn StateView> = if self.config.use_ethereum {
            Box::new(EvmState::new(self.storage.clone(), root)?)
        } else {
            Box::new(NativeState::new(self.storage.clone(), root)?)
        };
        Ok(StateContext {
            caller: caller.to_string(),
            pre_root: root,
            view,
            receipts: Vec::new(),
        })
    }

    /// Opens a state scope at the canonical head.
    pub fn head_context(&self, caller: &str) -> Result<StateContext, AppError> {
        let head = self.storage.current_block()?;
        self.new_context(caller, head.header.state_roots().state_root())
    }

    fn check_interpreter(&self, tag: &str) -> Result<(), AppError> {
        if !self.registry.contains(tag) {
            return Err(AppError::InvalidInterpreter);
        }
        // Exactly one interpreter family per chain mode.
        if self.config.use_ethereum != (tag == ETHEREUM_INTERPRETER) {
            return Err(AppError::InvalidInterpreter);
        }
        Ok(())
    }

    fn state_nonce_at_head(&self, sender: &str) -> Result<u64, AppError> {
        let head = self.storage.current_block()?;
        let snapshot = self
            .storage
            .state_at(head.header.state_roots().state_root())?;
        let nonce = if self.config.use_ethereum {
            snapshot
                .eth_accounts
                .get(&domain_to_address(sender))
                .map(|a| a.nonce)
                .unwrap_or_default()
        } else {
            snapshot
                .accounts
                .get(sender)
                .map(|a| a.nonce)
                .unwrap_or_default()
        };
        Ok(nonce)
    }

    /// Ingress validation: size and interpreter gates, the strict-next
    /// nonce rule against both committed state and in-flight queue, then
    /// the interpreter's own verification. Accepted transactions enter the
    /// nonce tracker.
    pub fn validate_tx(&self, tx: &Transaction) -> Result<(), AppError> {
        let started = Instant::now();
        if tx.size() > self.config.tx_size_limit {
            return Err(AppError::TxTooLarge);
        }
        self.check_interpreter(tx.interpreter())?;

        let state_nonce = self.state_nonce_at_head(tx.from())?;
        let expected = self
            .nonce_tracker
            .next_nonce(tx.from())
            .unwrap_or(state_nonce)
            .max(state_nonce);
        debug!(
            sender = tx.from(),
            state_nonce,
            expected,
            tx_nonce = tx.nonce(),
            "validate tx nonce"
        );
        if tx.nonce() < expected {
            return Err(AppError::NonceTooLow);
        }
        if tx.nonce() > expected {
            return Err(AppError::NonceTooHigh);
        }

        let head = self.storage.current_block()?;
        let pre_root = head.header.state_roots().state_root();
        let mut context = self.new_context("validate", pre_root)?;
        let mut ictx = InterpreterCtx::new(
            context.view.as_mut(),
            pre_root,
            &head.header,
            &self.storage,
            tx.gas_limit(),
            &self.config,
        );
        let interpreter = self
            .registry
            .get(tx.interpreter())
            .ok_or(AppError::InvalidInterpreter)?;
        interpreter.verify_tx(&mut ictx, tx)?;

        self.nonce_tracker.push(tx);
        debug!(elapsed = ?started.elapsed(), "validate tx end");
        Ok(())
    }

    /// Cheap head re-validation used when serving batches: drops
    /// transactions the chain has moved past, defers gapped ones.
    pub fn revalidate_tx(&self, tx: &Transaction) -> Result<(), AppError> {
        self.check_interpreter(tx.interpreter())?;
        let state_nonce = self.state_nonce_at_head(tx.from())?;
        if tx.nonce() < state_nonce {
            return Err(AppError::NonceTooLow);
        }
        let expected = self
            .nonce_tracker
            .next_nonce(tx.from())
            .unwrap_or(state_nonce)
            .max(state_nonce);
        if tx.nonce() > expected {
            return Err(AppError::NonceTooHigh);
        }
        Ok(())
    }

    /// Highest in-flight nonce for `account` (0 when none).
    pub fn cache_nonce(&self, account: &str) -> u64 {
        self.nonce_tracker.cache_nonce(account)
    }

    /// Nonce a client should use next: committed state advanced past the
    /// in-flight queue, whichever is higher.
    pub fn pending_nonce(&self, account: &str) -> Result<u64, AppError> {
        let state_nonce = self.state_nonce_at_head(account)?;
        Ok(self
            .nonce_tracker
            .next_nonce(account)
            .unwrap_or(state_nonce)
            .max(state_nonce))
    }

    /// Executes `txs` against the context, producing the tentative state
    /// root and receipts. Block hash is unknown here: log entries carry
    /// the zero hash until [`Application::commit`] stamps them.
    pub fn prepare(
        &self,
        context: &mut StateContext,
        header: &BlockHeader,
        txs: &[Transaction],
        total_gas: u64,
    ) -> Result<PrepareOutcome, AppError> {
        let started = Instant::now();
        let _guard = self.commit_lock.read().unwrap_or_else(|e| e.into_inner());

        let mut used_gas = 0u64;
        let mut ok_txs = Vec::new();
        let mut err_txs = Vec::new();
        let mut receipts = Vec::new();
        let mut tx_count = 0u64;

        let pre_root = context.pre_root;
        let mut ictx = InterpreterCtx::new(
            context.view.as_mut(),
            pre_root,
            header,
            &self.storage,
            total_gas,
            &self.config,
        );

        for tx in txs {
            if used_gas > total_gas {
                break;
            }
            let Some(interpreter) = self.registry.get(tx.interpreter()) else {
                error!(interpreter = tx.interpreter(), "unknown interpreter");
                err_txs.push(tx.clone());
                continue;
            };
            if let Err(err) = interpreter.verify_tx(&mut ictx, tx) {
                error!(%err, hash = %tx.hash(), "interpreter verify tx");
                err_txs.push(tx.clone());
                continue;
            }

            ictx.prepare(tx.hash(), H256::zero(), tx_count);
            let snapshot = ictx.snapshot();
            match interpreter.apply_tx(&mut ictx, tx, &mut used_gas) {
                Ok(receipt) => {
                    ok_txs.push(tx.clone());
                    tx_count += 1;
                    if let Some(address) = receipt.contract_address {
                        trace!(contract = %address, "deploy contract");
                    }
                    receipts.push(receipt);
                    self.nonce_tracker.push(tx);
                }
                Err(AppError::GasLimitReached) => break,
                Err(err) => {
                    error!(%err, hash = %tx.hash(), "prepare apply transaction");
                    ictx.revert_to(snapshot);
                    if err.is_fatal() {
                        return Err(err);
                    }
                    err_txs.push(tx.clone());
                }
            }
        }

        let state_root = ictx.state.intermediate_root();
        drop(ictx);
        context.receipts.extend(receipts);

        debug!(elapsed = ?started.elapsed(), count = txs.len(), "prepare done");
        Ok(PrepareOutcome {
            state_root,
            gas_used: used_gas,
            ok_txs,
            err_txs,
        })
    }

    /// Finalizes the context's state, fixes up per-receipt gas from the
    /// cumulative sequence, stamps block identifiers into every log and
    /// persists the receipts. Holds the process-wide commit lock for the
    /// whole sequence.
    pub fn commit(
        &self,
        context: &mut StateContext,
        header: &BlockHeader,
    ) -> Result<H256, AppError> {
        let started = Instant::now();
        let _guard = self.commit_lock.write().unwrap_or_else(|e| e.into_inner());

        let root = context.view.commit()?;
        debug!(root = %root, "state committed");

        let block_hash = header.hash();
        let mut prev_cumulative = 0u64;
        for (index, receipt) in context.receipts.iter_mut().enumerate() {
            if index == 0 {
                receipt.cumulative_gas_used = receipt.gas_used;
            } else {
                receipt.gas_used = receipt.cumulative_gas_used - prev_cumulative;
            }
            prev_cumulative = receipt.cumulative_gas_used;
            for log in &mut receipt.logs {
                log.block_height = header.height;
                log.block_hash = block_hash;
            }
        }

        self.storage
            .write_receipts(block_hash, header.height, context.receipts.clone())?;

        debug!(elapsed = ?started.elapsed(), "commit done");
        Ok(root)
    }

    /// A transaction committed: prune its lower in-flight nonces.
    pub fn delete_ok_tx(&self, tx: &Transaction) {
        self.nonce_tracker.delete_ok_tx(tx);
    }

    /// A transaction failed: cascade away its higher in-flight nonces.
    pub fn delete_err_tx(&self, tx: &Transaction) {
        self.nonce_tracker.delete_err_tx(tx);
    }
}

impl AppRouter for Application {
    fn supports(&self, tx_type: &str) -> bool {
        tx_type == STATE_TX_TYPE
    }

    fn validate_tx(&self, tx: &Transaction) -> Result<(), AppError> {
        Application::validate_tx(self, tx)
    }

    fn revalidate_tx(&self, tx: &Transaction) -> Result<(), AppError> {
        Application::revalidate_tx(self, tx)
    }

    fn delete_ok_tx(&self, tx: &Transaction) {
        Application::delete_ok_tx(self, tx);
    }

    fn delete_err_tx(&self, tx: &Transaction) {
        Application::delete_err_tx(self, tx);
    }
}
