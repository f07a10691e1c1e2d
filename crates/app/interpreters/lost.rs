use chain5j_common::Address;
use chain5j_common::types::{
    AccountOp, AccountOpData, LostRequest, LostStore, Receipt, Transaction,
};

use crate::constants::{LOST_FOUND_INTERVAL, TX_GAS_COST};
use crate::error::AppError;
use crate::interpreter::{Interpreter, InterpreterCtx};
use crate::state::NativeState;

/// Lost-key recovery: a partner files a request, the recovery address
/// claims it after the waiting period, the owner may cancel it.
pub struct LostInterpreter;

impl Interpreter for LostInterpreter {
    fn verify_tx(&self, ctx: &mut InterpreterCtx<'_>, tx: &Transaction) -> Result<(), AppError> {
        let now = ctx.header.timestamp;
        let state = ctx.native()?;

        let from = state
            .get_account(tx.from())
            .ok_or(AppError::FromAccountNotFound)?;
        if from.is_frozen {
            return Err(AppError::FrozenAccount);
        }
        let signer = tx.signer().map_err(|_| AppError::InvalidSigner)?;

        let envelope = decode_envelope(tx)?;
        match envelope.operation {
            AccountOp::LostRequest => {
                if !from.contains_address(&signer) {
                    return Err(AppError::InvalidSigner);
                }
                let mut request: LostRequest = payload(&envelope)?;
                request.normalize();
                verify_lost_request(state, tx.from(), &request)
            }
            // The claim is signed by the recovery address, which is not
            // (yet) among the account's addresses.
            AccountOp::FoundRequest => verify_found_request(state, now, tx.from(), signer),
            AccountOp::LostReset => {
                if !from.contains_address(&signer) {
                    return Err(AppError::InvalidSigner);
                }
                Ok(())
            }
            _ => Err(AppError::InvalidAccountOp),
        }
    }

    fn apply_tx(
        &self,
        ctx: &mut InterpreterCtx<'_>,
        tx: &Transaction,
        used_gas: &mut u64,
    ) -> Result<Receipt, AppError> {
        self.verify_tx(ctx, tx)?;

        let header_time = ctx.header.timestamp;
        let state = ctx.native()?;

        let envelope = decode_envelope(tx)?;
        match envelope.operation {
            AccountOp::LostRequest => {
                let mut request: LostRequest = payload(&envelope)?;
                request.normalize();
                let name = request.account_name();
                let store = LostStore {
                    request,
                    timestamp: header_time + LOST_FOUND_INTERVAL,
                };
                state.set_lost(&name, Some(&store))?;
            }
            AccountOp::FoundRequest => {
                let store = state
                    .get_account(tx.from())
                    .and_then(|account| account.lost())
                    .ok_or(AppError::Unauthorized)?;
                state.set_address(tx.from(), store.request.recover_addr);
                state.set_lost(tx.from(), None)?;
            }
            AccountOp::LostReset => {
                state.set_lost(tx.from(), None)?;
            }
            _ => return Err(AppError::InvalidAccountOp),
        }

        let nonce = state.account_nonce(tx.from());
        state.set_account_nonce(tx.from(), nonce + 1);

        *used_gas += TX_GAS_COST;
        let mut receipt = Receipt::new(false, *used_gas);
        receipt.transaction_hash = tx.hash();
        receipt.gas_used = TX_GAS_COST;
        Ok(receipt)
    }
}

fn decode_envelope(tx: &Transaction) -> Result<AccountOpData, AppError> {
    AccountOpData::decode(tx.input()).map_err(|e| AppError::InvalidInput(e.to_string()))
}

fn payload<T: for<'de> serde::Deserialize<'de>>(
    envelope: &AccountOpData,
) -> Result<T, AppError> {
    envelope
        .payload()
        .map_err(|e| AppError::InvalidInput(e.to_string()))
}

fn verify_lost_request(
    state: &NativeState,
    from_name: &str,
    request: &LostRequest,
) -> Result<(), AppError> {
    let lost_account = state
        .get_account(&request.account_name())
        .ok_or(AppError::ToAccountNotFound)?;
    let partner = lost_account.partner().ok_or(AppError::Unauthorized)?;
    if partner.account_name() != from_name {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

fn verify_found_request(
    state: &NativeState,
    now: u64,
    account_name: &str,
    signer: Address,
) -> Result<(), AppError> {
    let lost_account = state
        .get_account(account_name)
        .ok_or(AppError::ToAccountNotFound)?;
    let store = lost_account.lost().ok_or(AppError::Unauthorized)?;
    if store.request.recover_addr != signer {
        return Err(AppError::Unauthorized);
    }
    if now < store.timestamp {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}
