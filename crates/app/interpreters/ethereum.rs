use std::sync::Arc;

use chain5j_common::types::{Receipt, Transaction};
use chain5j_common::{Address, U256};

use crate::error::AppError;
use crate::interpreter::{Interpreter, InterpreterCtx};
use crate::state_transition::apply_evm_transaction;
use crate::vm::{Vm, VmMessage};

/// Contract execution on the EVM-address state model: the `from` field is
/// the signer's hex address itself.
pub struct EthereumInterpreter {
    vm: Arc<dyn Vm>,
}

impl EthereumInterpreter {
    pub fn new(vm: Arc<dyn Vm>) -> Self {
        EthereumInterpreter { vm }
    }
}

fn parse_address(name: &str) -> Result<Address, AppError> {
    let trimmed = name.strip_prefix("0x").unwrap_or(name);
    let raw = hex::decode(trimmed)
        .map_err(|_| AppError::InvalidInput(format!("bad address: {name}")))?;
    if raw.len() != 20 {
        return Err(AppError::InvalidInput(format!("bad address: {name}")));
    }
    Ok(Address::from_slice(&raw))
}

impl Interpreter for EthereumInterpreter {
    fn verify_tx(&self, ctx: &mut InterpreterCtx<'_>, tx: &Transaction) -> Result<(), AppError> {
        let signer = tx.signer()?;
        if parse_address(tx.from())? != signer {
            return Err(AppError::InvalidSigner);
        }
        if ctx.state.balance(signer) < tx.cost() {
            return Err(AppError::BalanceNotEnough);
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
        let to = if tx.to().is_empty() {
            None
        } else {
            Some(parse_address(tx.to())?)
        };
        let msg = VmMessage {
            from: parse_address(tx.from())?,
            to,
            nonce: tx.nonce(),
            value: tx.value(),
            gas_limit: tx.gas_limit(),
            gas_price: U256::from(tx.gas_price()),
            input: tx.input().clone(),
            check_nonce: true,
        };
        apply_evm_transaction(ctx, self.vm.as_ref(), tx, &msg, used_gas)
    }
}
