use chain5j_common::types::{Receipt, Transaction};

use crate::error::AppError;
use crate::interpreter::{Interpreter, InterpreterCtx};

/// Placeholder for certificate-authority transactions. Accepts everything
/// and mutates nothing; the empty receipt keeps the block's gas
/// bookkeeping uniform.
pub struct CaInterpreter;

impl Interpreter for CaInterpreter {
    fn verify_tx(&self, _ctx: &mut InterpreterCtx<'_>, _tx: &Transaction) -> Result<(), AppError> {
        Ok(())
    }

    fn apply_tx(
        &self,
        ctx: &mut InterpreterCtx<'_>,
        tx: &Transaction,
        used_gas: &mut u64,
    ) -> Result<Receipt, AppError> {
        self.verify_tx(ctx, tx)?;
        let mut receipt = Receipt::new(false, *used_gas);
        receipt.transaction_hash = tx.hash();
        Ok(receipt)
    }
}
