use chain5j_common::types::{Receipt, Transaction};
use tracing::debug;

use crate::constants::TX_GAS_COST;
use crate::error::AppError;
use crate::interpreter::{Interpreter, InterpreterCtx};

/// The minimal fund transfer between two native accounts.
pub struct BaseInterpreter;

impl Interpreter for BaseInterpreter {
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

        if state.get_account(tx.to()).is_none() {
            return Err(AppError::ToAccountNotFound);
        }

        if state.account_balance(tx.from()) < tx.cost() {
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

        let state = ctx.native()?;
        let nonce = state.account_nonce(tx.from());
        if nonce != tx.nonce() {
            debug!(state = nonce, tx = tx.nonce(), "nonce mismatch on apply");
            return Err(AppError::NonceMismatch {
                state: nonce,
                tx: tx.nonce(),
            });
        }
        state.set_account_nonce(tx.from(), nonce + 1);

        if !tx.value().is_zero() {
            state.sub_account_balance(tx.from(), tx.value());
            if !tx.to().is_empty() {
                state.add_account_balance(tx.to(), tx.value());
            }
        }

        *used_gas += TX_GAS_COST;
        let mut receipt = Receipt::new(false, *used_gas);
        receipt.transaction_hash = tx.hash();
        receipt.gas_used = TX_GAS_COST;
        Ok(receipt)
    }
}
