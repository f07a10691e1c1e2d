//! Interpreter seam: the per-block execution context, the block gas pool
//! and the registry routing transactions by their interpreter tag.

use std::collections::HashMap;
use std::sync::Arc;

use chain5j_common::H256;
use chain5j_common::types::{
    ACCOUNT_INTERPRETER, BASE_INTERPRETER, BlockHeader, CA_INTERPRETER, ChainConfig,
    ETHEREUM_INTERPRETER, EVM_INTERPRETER, LOST_INTERPRETER, PERMISSION_INTERPRETER, Receipt,
    Transaction,
};
use chain5j_storage::Store;

use crate::error::AppError;
use crate::interpreters;
use crate::portal::{NodeKey, NodePermission};
use crate::state::{NativeState, StateView};
use crate::vm::Vm;

/// Decreasing counter of gas still available to the block's transactions.
#[derive(Debug, Clone)]
pub struct GasPool(u64);

impl GasPool {
    pub fn new(total: u64) -> Self {
        GasPool(total)
    }

    pub fn gas(&self) -> u64 {
        self.0
    }

    pub fn sub_gas(&mut self, amount: u64) -> Result<(), AppError> {
        if self.0 < amount {
            return Err(AppError::GasLimitReached);
        }
        self.0 -= amount;
        Ok(())
    }

    pub fn add_gas(&mut self, amount: u64) {
        self.0 = self.0.saturating_add(amount);
    }
}

/// Per-block execution scope handed to the interpreters.
pub struct InterpreterCtx<'a> {
    pub state: &'a mut dyn StateView,
    pub pre_root: H256,
    pub header: &'a BlockHeader,
    pub chain: &'a Store,
    pub config: &'a ChainConfig,
    pub gas_pool: GasPool,
}

impl<'a> InterpreterCtx<'a> {
    pub fn new(
        state: &'a mut dyn StateView,
        pre_root: H256,
        header: &'a BlockHeader,
        chain: &'a Store,
        total_gas: u64,
        config: &'a ChainConfig,
    ) -> Self {
        InterpreterCtx {
            state,
            pre_root,
            header,
            chain,
            config,
            gas_pool: GasPool::new(total_gas),
        }
    }

    pub fn prepare(&mut self, tx_hash: H256, block_hash: H256, index: u64) {
        self.state.prepare(tx_hash, block_hash, index);
    }

    pub fn snapshot(&mut self) -> usize {
        self.state.snapshot()
    }

    pub fn revert_to(&mut self, token: usize) {
        self.state.revert_to(token);
    }

    /// The native schema, or `InvalidInterpreter` when the block runs on
    /// the EVM back-end.
    pub fn native(&mut self) -> Result<&mut NativeState, AppError> {
        self.state.native_mut().ok_or(AppError::InvalidInterpreter)
    }
}

/// Per-transaction-kind policy: stateless verification plus state
/// application. `apply_tx` re-verifies before mutating; a failure after any
/// mutation is rolled back by the prepare loop's snapshot.
pub trait Interpreter: Send + Sync {
    fn verify_tx(&self, ctx: &mut InterpreterCtx<'_>, tx: &Transaction) -> Result<(), AppError>;

    fn apply_tx(
        &self,
        ctx: &mut InterpreterCtx<'_>,
        tx: &Transaction,
        used_gas: &mut u64,
    ) -> Result<Receipt, AppError>;
}

/// Tag-indexed interpreter set, built once per application with its
/// capabilities injected.
pub struct InterpreterRegistry {
    interpreters: HashMap<&'static str, Box<dyn Interpreter>>,
}

impl InterpreterRegistry {
    pub fn new(
        vm: Arc<dyn Vm>,
        permission: Arc<dyn NodePermission>,
        node_key: Arc<dyn NodeKey>,
    ) -> Self {
        let mut interpreters: HashMap<&'static str, Box<dyn Interpreter>> = HashMap::new();
        interpreters.insert(BASE_INTERPRETER, Box::new(interpreters::BaseInterpreter));
        interpreters.insert(
            ACCOUNT_INTERPRETER,
            Box::new(interpreters::AccountInterpreter),
        );
        interpreters.insert(LOST_INTERPRETER, Box::new(interpreters::LostInterpreter));
        interpreters.insert(
            EVM_INTERPRETER,
            Box::new(interpreters::EvmInterpreter::new(vm.clone())),
        );
        interpreters.insert(CA_INTERPRETER, Box::new(interpreters::CaInterpreter));
        interpreters.insert(
            ETHEREUM_INTERPRETER,
            Box::new(interpreters::EthereumInterpreter::new(vm)),
        );
        interpreters.insert(
            PERMISSION_INTERPRETER,
            Box::new(interpreters::PermissionInterpreter::new(
                permission, node_key,
            )),
        );
        InterpreterRegistry { interpreters }
    }

    pub fn get(&self, tag: &str) -> Option<&dyn Interpreter> {
        self.interpreters.get(tag).map(|boxed| boxed.as_ref())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.interpreters.contains_key(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_pool_rejects_overdraw() {
        let mut pool = GasPool::new(100);
        pool.sub_gas(60).expect("within budget");
        assert!(matches!(
            pool.sub_gas(41),
            Err(AppError::GasLimitReached)
        ));
        assert_eq!(pool.gas(), 40);
        pool.add_gas(10);
        assert_eq!(pool.gas(), 50);
    }
}
