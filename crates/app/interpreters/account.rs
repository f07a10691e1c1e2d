use chain5j_common::types::{
    AccountOp, AccountOpData, AccountStore, DomainStore, FrozenAccountData,
    MAX_ACCOUNT_NAME_LEN, MAX_DOMAIN_LEN, MIN_ACCOUNT_NAME_LEN, MIN_DOMAIN_LEN, PartnerData,
    Permissions, Receipt, Transaction, UpdatePermissionData, is_sub_domain,
};
use tracing::debug;

use crate::constants::TX_GAS_COST;
use crate::error::AppError;
use crate::interpreter::{Interpreter, InterpreterCtx};
use crate::state::NativeState;

/// Account administration: registration of users and domains, freezing,
/// permission updates and partner binding.
pub struct AccountInterpreter;

impl Interpreter for AccountInterpreter {
    fn verify_tx(&self, ctx: &mut InterpreterCtx<'_>, tx: &Transaction) -> Result<(), AppError> {
        let state = ctx.native()?;

        let from = state
            .get_account(tx.from())
            .ok_or(AppError::FromAccountNotFound)?;
        if from.is_frozen {
            return Err(AppError::FrozenAccount);
        }
        let signer = tx.signer().map_err(|_| AppError::InvalidSigner)?;
        if !from.contains_address(&signer) {
            return Err(AppError::InvalidSigner);
        }

        let envelope = decode_envelope(tx)?;
        match envelope.operation {
            AccountOp::RegisterAccount => {
                let mut register: AccountStore = payload(&envelope)?;
                register.normalize();
                if register.account_name() != tx.to() {
                    return Err(AppError::InvalidInput(
                        "registered name does not match tx target".to_string(),
                    ));
                }
                verify_register_account(state, &from, &register)
            }
            AccountOp::RegisterDomain => {
                let mut register: AccountStore = payload(&envelope)?;
                register.normalize();
                verify_register_domain(state, &from, &register)
            }
            AccountOp::FrozenAccount => {
                let mut data: FrozenAccountData = payload(&envelope)?;
                data.normalize();
                verify_frozen(state, &from, &data)
            }
            AccountOp::UpdateDataPermission => {
                let mut data: UpdatePermissionData = payload(&envelope)?;
                data.normalize();
                verify_update_permission(state, &from, &data)
            }
            AccountOp::SetPartner => {
                let mut data: PartnerData = payload(&envelope)?;
                data.normalize();
                verify_set_partner(&from, &data)
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

        // New domains are stamped with the height of the block being built.
        let next_height = ctx.chain.current_block()?.header.height + 1;
        let state = ctx.native()?;

        let envelope = decode_envelope(tx)?;
        match envelope.operation {
            AccountOp::RegisterAccount => {
                let mut register: AccountStore = payload(&envelope)?;
                register.normalize();
                state.create_account(register);
            }
            AccountOp::RegisterDomain => {
                let mut register: AccountStore = payload(&envelope)?;
                register.normalize();
                register.permissions = Some(Permissions::domain_admin());
                register.is_admin = true;
                register.enable_deploy_contract = true;
                register.is_frozen = false;
                let domain = register.domain.clone();
                let admin = register.cn.clone();
                state.create_account(register);
                state.add_domain(
                    &domain,
                    DomainStore {
                        admin,
                        number: next_height,
                    },
                );
                debug!(domain, "domain registered");
            }
            AccountOp::FrozenAccount => {
                let mut data: FrozenAccountData = payload(&envelope)?;
                data.normalize();
                state.set_frozen(&data.account_name(), data.frozen);
            }
            AccountOp::UpdateDataPermission => {
                let mut data: UpdatePermissionData = payload(&envelope)?;
                data.normalize();
                state.update_permission(&data.account_name(), data.permissions);
            }
            AccountOp::SetPartner => {
                let mut data: PartnerData = payload(&envelope)?;
                data.normalize();
                state.set_partner(tx.from(), &data)?;
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

fn verify_account_format(account: &AccountStore, enable_domain: bool) -> Result<(), AppError> {
    if account.cn.len() < MIN_ACCOUNT_NAME_LEN || account.cn.len() > MAX_ACCOUNT_NAME_LEN {
        return Err(AppError::InvalidAccountNameLen);
    }
    if enable_domain {
        if account.domain.len() < MIN_DOMAIN_LEN || account.domain.len() > MAX_DOMAIN_LEN {
            return Err(AppError::InvalidDomainLen);
        }
    } else if !account.domain.is_empty() {
        return Err(AppError::InvalidDomainFormat);
    }

    if !account
        .cn
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_')
    {
        return Err(AppError::InvalidAccountNameFormat);
    }
    if enable_domain
        && !account
            .domain
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.')
    {
        return Err(AppError::InvalidDomainFormat);
    }
    Ok(())
}

fn verify_new_account_basics(
    state: &NativeState,
    register: &AccountStore,
    enable_domain: bool,
) -> Result<(), AppError> {
    verify_account_format(register, enable_domain)?;
    if !register.balance.is_zero() {
        return Err(AppError::InvalidBalance);
    }
    if register.nonce != 0 {
        return Err(AppError::InvalidNonce);
    }
    for address in &register.addresses {
        if state.address_exists(address) {
            return Err(AppError::AddressExists);
        }
    }
    Ok(())
}

fn verify_register_account(
    state: &NativeState,
    from: &AccountStore,
    register: &AccountStore,
) -> Result<(), AppError> {
    verify_new_account_basics(state, register, !from.domain.is_empty())?;

    if !from.authorized_register_user() {
        return Err(AppError::Unauthorized);
    }
    if !from.enable_deploy_contract && register.enable_deploy_contract {
        return Err(AppError::Unauthorized);
    }

    if from.domain == register.domain {
        // Same-level admins cannot be minted by their peers.
        if register.is_admin {
            return Err(AppError::InvalidAdminField);
        }
        if register.permissions.is_some() {
            return Err(AppError::InvalidPermission);
        }
    } else if is_sub_domain(&from.domain, &register.domain) {
        if register.is_admin {
            let granter = from
                .permissions
                .as_ref()
                .ok_or(AppError::Unauthorized)?;
            if !granter.enable_register_subdomain {
                return Err(AppError::Unauthorized);
            }
            let granted = register
                .permissions
                .as_ref()
                .ok_or(AppError::InvalidPermission)?;
            if !granter.dominates(granted) || granted.enable_register_domain {
                return Err(AppError::InvalidPermission);
            }
        } else if register.permissions.is_some() {
            return Err(AppError::InvalidPermission);
        }
    } else {
        return Err(AppError::InvalidDomain);
    }

    if state.get_account(&register.account_name()).is_some() {
        return Err(AppError::AccountExists);
    }
    Ok(())
}

fn verify_register_domain(
    state: &NativeState,
    from: &AccountStore,
    register: &AccountStore,
) -> Result<(), AppError> {
    verify_new_account_basics(state, register, !from.domain.is_empty())?;

    if !from.authorized_register_domain() {
        return Err(AppError::Unauthorized);
    }
    if state.get_domain(&register.domain).is_some() {
        return Err(AppError::DomainExists);
    }
    Ok(())
}

fn verify_admin_over_target(
    state: &NativeState,
    from: &AccountStore,
    target_name: &str,
    target_domain: &str,
) -> Result<AccountStore, AppError> {
    if !from.is_admin {
        return Err(AppError::Unauthorized);
    }
    let target = state
        .get_account(target_name)
        .ok_or(AppError::AccountNotExists)?;
    if from.domain == target.domain {
        if target.is_admin {
            return Err(AppError::Unauthorized);
        }
    } else if !is_sub_domain(&from.domain, target_domain) {
        return Err(AppError::Unauthorized);
    }
    Ok(target)
}

fn verify_frozen(
    state: &NativeState,
    from: &AccountStore,
    data: &FrozenAccountData,
) -> Result<(), AppError> {
    verify_admin_over_target(state, from, &data.account_name(), &data.domain)?;
    Ok(())
}

fn verify_update_permission(
    state: &NativeState,
    from: &AccountStore,
    data: &UpdatePermissionData,
) -> Result<(), AppError> {
    verify_admin_over_target(state, from, &data.account_name(), &data.domain)?;
    let granter = from.permissions.as_ref().ok_or(AppError::Unauthorized)?;
    if !granter.dominates(&data.permissions) {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

fn verify_set_partner(from: &AccountStore, data: &PartnerData) -> Result<(), AppError> {
    if from.domain == data.domain
        || is_sub_domain(&data.domain, &from.domain)
        || data.cn.is_empty()
    {
        Ok(())
    } else {
        Err(AppError::InvalidDomain)
    }
}
