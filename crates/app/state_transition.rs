//! Gas-accounting state transition wrapping the external VM.
//!
//! Applies a message by buying gas from the sender and the block gas pool,
//! charging the intrinsic cost, dispatching to `Create`/`Call`, refunding
//! up to half of the gas used and paying the remainder to the coinbase.
//! VM errors are recorded in the receipt and do not fail the block, with
//! the single exception of an insufficient balance during execution.

use bytes::Bytes;
use chain5j_common::crypto::keccak;
use chain5j_common::types::{Receipt, Transaction, bloom_from_logs};
use chain5j_common::{Address, U256};
use rlp::RlpStream;
use tracing::error;

use crate::constants::{
    TX_CREATE_GAS_COST, TX_DATA_NON_ZERO_GAS, TX_DATA_ZERO_GAS_COST, TX_GAS_COST,
};
use crate::error::AppError;
use crate::interpreter::{GasPool, InterpreterCtx};
use crate::state::StateView;
use crate::vm::{Vm, VmBlockContext, VmError, VmMessage, VmOutcome};

/// Gas charged before execution starts: a base cost plus per-byte pricing
/// of the calldata.
pub fn intrinsic_gas(data: &[u8], is_create: bool) -> Result<u64, AppError> {
    let mut gas = if is_create {
        TX_CREATE_GAS_COST
    } else {
        TX_GAS_COST
    };
    if !data.is_empty() {
        let non_zero = data.iter().filter(|&&byte| byte != 0).count() as u64;
        gas = non_zero
            .checked_mul(TX_DATA_NON_ZERO_GAS)
            .and_then(|cost| gas.checked_add(cost))
            .ok_or(AppError::OutOfGas)?;
        let zero = data.len() as u64 - non_zero;
        gas = zero
            .checked_mul(TX_DATA_ZERO_GAS_COST)
            .and_then(|cost| gas.checked_add(cost))
            .ok_or(AppError::OutOfGas)?;
    }
    Ok(gas)
}

/// Address a creation transaction deploys to: `keccak(rlp([sender, nonce]))`.
pub fn create_address(sender: Address, nonce: u64) -> Address {
    let mut stream = RlpStream::new_list(2);
    stream.append(&sender);
    stream.append(&nonce);
    let digest = keccak(stream.out());
    Address::from_slice(&digest.as_bytes()[12..])
}

struct StateTransition<'a> {
    state: &'a mut dyn StateView,
    gas_pool: &'a mut GasPool,
    vm: &'a dyn Vm,
    block: &'a VmBlockContext,
    msg: &'a VmMessage,
    gas: u64,
    initial_gas: u64,
}

/// Computes the new state by applying `msg` against the current view.
/// Returns the VM output, the gas used (refunds included) and whether the
/// execution failed.
pub fn apply_message(
    vm: &dyn Vm,
    state: &mut dyn StateView,
    gas_pool: &mut GasPool,
    block: &VmBlockContext,
    msg: &VmMessage,
) -> Result<(Bytes, u64, bool), AppError> {
    StateTransition {
        state,
        gas_pool,
        vm,
        block,
        msg,
        gas: 0,
        initial_gas: 0,
    }
    .transition()
}

impl StateTransition<'_> {
    fn use_gas(&mut self, amount: u64) -> Result<(), AppError> {
        if self.gas < amount {
            return Err(AppError::OutOfGas);
        }
        self.gas -= amount;
        Ok(())
    }

    fn buy_gas(&mut self) -> Result<(), AppError> {
        let cost = U256::from(self.msg.gas_limit) * self.msg.gas_price;
        if self.state.balance(self.msg.from) < cost {
            return Err(AppError::InsufficientBalanceForGas);
        }
        self.gas_pool.sub_gas(self.msg.gas_limit)?;
        self.gas += self.msg.gas_limit;
        self.initial_gas = self.msg.gas_limit;
        self.state.sub_balance(self.msg.from, cost);
        Ok(())
    }

    fn pre_check(&mut self) -> Result<(), AppError> {
        if self.msg.check_nonce {
            // A nonce running ahead of state is tolerated during Prepare;
            // only a stale nonce is fatal.
            let nonce = self.state.nonce(self.msg.from);
            if nonce > self.msg.nonce {
                error!(state = nonce, tx = self.msg.nonce, "nonce below state");
                return Err(AppError::NonceTooLow);
            }
        }
        self.buy_gas()
    }

    fn transition(mut self) -> Result<(Bytes, u64, bool), AppError> {
        self.pre_check()?;

        let is_create = self.msg.to.is_none();
        let intrinsic = intrinsic_gas(&self.msg.input, is_create)?;
        self.use_gas(intrinsic)?;

        let outcome: VmOutcome = match self.msg.to {
            None => self
                .vm
                .create(self.state, self.block, self.msg, self.gas),
            Some(to) => {
                let next = self.state.nonce(self.msg.from) + 1;
                self.state.set_nonce(self.msg.from, next);
                self.vm.call(self.state, self.block, self.msg, to, self.gas)
            }
        };
        self.gas = outcome.gas_left;

        let failed = match outcome.error {
            Some(VmError::InsufficientBalance) => {
                return Err(AppError::InsufficientBalanceForGas);
            }
            Some(err) => {
                error!(%err, "vm returned with error");
                true
            }
            None => false,
        };

        self.refund_gas();
        self.state.add_balance(
            self.block.coinbase,
            U256::from(self.gas_used()) * self.msg.gas_price,
        );

        Ok((outcome.return_data, self.gas_used(), failed))
    }

    fn refund_gas(&mut self) {
        // Refund counter, capped to half of the gas used.
        let refund = (self.gas_used() / 2).min(self.state.refund());
        self.gas += refund;

        let remaining = U256::from(self.gas) * self.msg.gas_price;
        self.state.add_balance(self.msg.from, remaining);

        // Unused gas goes back to the block gas counter for the next
        // transaction.
        self.gas_pool.add_gas(self.gas);
    }

    fn gas_used(&self) -> u64 {
        self.initial_gas - self.gas
    }
}

/// Runs a full EVM-backed transaction and assembles its receipt.
pub fn apply_evm_transaction(
    ctx: &mut InterpreterCtx<'_>,
    vm: &dyn Vm,
    tx: &Transaction,
    msg: &VmMessage,
    used_gas: &mut u64,
) -> Result<Receipt, AppError> {
    let block = VmBlockContext {
        coinbase: Address::zero(),
        height: ctx.header.height,
        timestamp: ctx.header.timestamp,
        gas_limit: ctx.header.gas_limit,
    };
    let (_ret, gas, failed) =
        apply_message(vm, &mut *ctx.state, &mut ctx.gas_pool, &block, msg)?;

    ctx.state.finalise();
    *used_gas += gas;

    let mut receipt = Receipt::new(failed, *used_gas);
    receipt.transaction_hash = tx.hash();
    receipt.gas_used = gas;
    if msg.to.is_none() {
        receipt.contract_address = Some(create_address(msg.from, tx.nonce()));
    }
    receipt.logs = ctx.state.get_logs(tx.hash());
    receipt.logs_bloom = bloom_from_logs(&receipt.logs);
    Ok(receipt)
}
