use std::sync::Arc;

use chain5j_common::crypto::domain_to_address;
use chain5j_common::types::{Receipt, Transaction};
use chain5j_common::U256;

use crate::error::AppError;
use crate::interpreter::{Interpreter, InterpreterCtx};
use crate::state::NativeState;
use crate::state_transition::apply_evm_transaction;
use crate::vm::{Vm, VmMessage};

/// Contract execution against the native state model, bridged into the
/// EVM address space.
pub struct EvmInterpreter {
    vm: Arc<dyn Vm>,
}

impl EvmInterpreter {
    pub fn new(vm: Arc<dyn Vm>) -> Self {
        EvmInterpreter { vm }
    }

    fn tx_as_message(state: &NativeState, tx: &Transaction) -> Result<VmMessage, AppError> {
        let to = if tx.to().is_empty() {
            None
        } else {
            let account = state
                .get_account(tx.to())
                .ok_or(AppError::ToAccountNotFound)?;
            if !account.is_contract() {
                return Err(AppError::InvalidContract);
            }
            Some(domain_to_address(&account.cn))
        };
        Ok(VmMessage {
            from: domain_to_address(tx.from()),
            to,
            nonce: tx.nonce(),
            value: tx.value(),
            gas_limit: tx.gas_limit(),
            gas_price: U256::from(tx.gas_price()),
            input: tx.input().clone(),
            check_nonce: true,
        })
    }
}

impl Interpreter for EvmInterpreter {
    fn verify_tx(&self, ctx: &mut InterpreterCtx<'_>, tx: &Transaction) -> Result<(), AppError> {
        let signer = tx.signer()?;
        let state = ctx.native()?;

        let from = state
            .get_account(tx.from())
            .ok_or(AppError::FromAccountNotFound)?;
        if from.is_frozen {
            return Err(AppError::FrozenAccount);
        }
        if !from.contains_address(&signer) {
            return Err(AppError::InvalidSigner);
        }

        if !tx.to().is_empty() {
            let to = state
                .get_account(tx.to())
                .ok_or(AppError::ToAccountNotFound)?;
            if !to.is_contract() {
                return Err(AppError::InvalidContract);
            }
        }
        Ok(())
    }

    fn apply_tx(
        &self,
        ctx: &mut InterpreterCtx<'_>,
        tx: &Transaction,
        used_gas: &mut u64,
    ) -> Result<Receipt, AppError> {
        self.verify_tx(ctx, tx)?;
        let msg = {
            let state = ctx.native()?;
            Self::tx_as_message(state, tx)?
        };
        apply_evm_transaction(ctx, self.vm.as_ref(), tx, &msg, used_gas)
    }
}
