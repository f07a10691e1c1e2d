use std::sync::Arc;

use chain5j_common::Address;
use chain5j_common::types::{Receipt, Transaction};
use serde::{Deserialize, Serialize};

use crate::constants::TX_GAS_COST;
use crate::error::AppError;
use crate::interpreter::{Interpreter, InterpreterCtx};
use crate::portal::{MemberInfo, NodeKey, NodePermission};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleType {
    Admin,
    Supervisor,
    Colleague,
    Peer,
    Observer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionOp {
    Add,
    Del,
}

/// Payload of a `chain5j.permission` transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOpData {
    pub role_type: RoleType,
    pub op: PermissionOp,
    pub addr: Address,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub height: u64,
}

/// Node-membership administration. ADMIN and PEER roles are unsupported;
/// SUPERVISOR changes require the signer to be a node admin at the current
/// height; COLLEAGUE and OBSERVER only resolve the peer identity.
pub struct PermissionInterpreter {
    permission: Arc<dyn NodePermission>,
    node_key: Arc<dyn NodeKey>,
}

impl PermissionInterpreter {
    pub fn new(permission: Arc<dyn NodePermission>, node_key: Arc<dyn NodeKey>) -> Self {
        PermissionInterpreter {
            permission,
            node_key,
        }
    }

    fn decode(tx: &Transaction) -> Result<PermissionOpData, AppError> {
        serde_json::from_slice(tx.input()).map_err(|e| AppError::InvalidInput(e.to_string()))
    }
}

impl Interpreter for PermissionInterpreter {
    fn verify_tx(&self, ctx: &mut InterpreterCtx<'_>, tx: &Transaction) -> Result<(), AppError> {
        let height = ctx.header.height;
        let state = ctx.native()?;

        let from = state
            .get_account(tx.from())
            .ok_or(AppError::FromAccountNotFound)?;
        if from.is_frozen {
            return Err(AppError::FrozenAccount);
        }
        let signer = tx.signer().map_err(|_| AppError::InvalidSigner)?;

        let data = Self::decode(tx)?;
        match data.role_type {
            RoleType::Admin | RoleType::Peer => Err(AppError::UnsupportedRole),
            RoleType::Supervisor => {
                if !self
                    .permission
                    .is_admin(&format!("{signer:#x}"), height)
                {
                    return Err(AppError::NotNodeAdmin);
                }
                Ok(())
            }
            RoleType::Colleague | RoleType::Observer => {
                let public_key = tx
                    .public_key()
                    .map_err(|_| AppError::InvalidSigner)?;
                self.node_key.id_from_pub(&public_key)?;
                Ok(())
            }
        }
    }

    fn apply_tx(
        &self,
        ctx: &mut InterpreterCtx<'_>,
        tx: &Transaction,
        used_gas: &mut u64,
    ) -> Result<Receipt, AppError> {
        self.verify_tx(ctx, tx)?;

        let data = Self::decode(tx)?;
        match data.role_type {
            RoleType::Admin | RoleType::Peer => return Err(AppError::UnsupportedRole),
            RoleType::Supervisor => match data.op {
                PermissionOp::Add => self.permission.add_supervisor(
                    data.addr,
                    MemberInfo {
                        name: data.name.clone(),
                        height: data.height,
                    },
                )?,
                PermissionOp::Del => self.permission.del_supervisor(data.addr)?,
            },
            // Peer-scoped membership is tracked outside the account state.
            RoleType::Colleague | RoleType::Observer => {}
        }

        let state = ctx.native()?;
        let nonce = state.account_nonce(tx.from());
        state.set_account_nonce(tx.from(), nonce + 1);

        *used_gas += TX_GAS_COST;
        let mut receipt = Receipt::new(false, *used_gas);
        receipt.transaction_hash = tx.hash();
        receipt.gas_used = TX_GAS_COST;
        Ok(receipt)
    }
}
