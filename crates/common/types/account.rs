use std::collections::BTreeMap;

use bytes::Bytes;
use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};

/// Extension-store key holding the partner record.
pub const PARTNER_KEY: &str = "partner";
/// Extension-store key holding the pending lost-recovery record.
pub const LOST_KEY: &str = "lost";

pub const MIN_ACCOUNT_NAME_LEN: usize = 2;
pub const MAX_ACCOUNT_NAME_LEN: usize = 64;
pub const MIN_DOMAIN_LEN: usize = 2;
pub const MAX_DOMAIN_LEN: usize = 128;

/// Capability flags an admin account may hold.
///
/// A permission set may only ever grant what the granting admin holds
/// (see [`Permissions::dominates`]); `enable_register_domain` is never
/// inherited by created sub-domain admins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    #[serde(default)]
    pub enable_register_user: bool,
    #[serde(default)]
    pub enable_update_user: bool,
    #[serde(default)]
    pub enable_frozen_user: bool,
    #[serde(default)]
    pub enable_register_domain: bool,
    #[serde(default)]
    pub enable_register_subdomain: bool,
}

impl Permissions {
    /// True when every flag granted to `other` is also held by `self`.
    /// Domain registration is excluded: it cannot be delegated downward.
    pub fn dominates(&self, other: &Permissions) -> bool {
        if !self.enable_register_user && other.enable_register_user {
            return false;
        }
        if !self.enable_update_user && other.enable_update_user {
            return false;
        }
        if !self.enable_frozen_user && other.enable_frozen_user {
            return false;
        }
        if !self.enable_register_subdomain && other.enable_register_subdomain {
            return false;
        }
        true
    }

    /// Permission set granted to a freshly registered domain admin.
    pub fn domain_admin() -> Self {
        Permissions {
            enable_register_user: true,
            enable_update_user: true,
            enable_frozen_user: true,
            enable_register_domain: false,
            enable_register_subdomain: true,
        }
    }
}

/// Account record in the native (`cn@domain`) state model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStore {
    pub cn: String,
    pub domain: String,
    #[serde(default)]
    pub balance: U256,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_frozen: bool,
    #[serde(default)]
    pub enable_deploy_contract: bool,
    #[serde(default)]
    pub permissions: Option<Permissions>,
    /// Extension blobs keyed by well-known names (partner, lost recovery).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Bytes>,
}

impl AccountStore {
    pub fn account_name(&self) -> String {
        format!("{}@{}", self.cn, self.domain)
    }

    pub fn contains_address(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn normalize(&mut self) {
        self.cn = self.cn.to_lowercase();
        self.domain = self.domain.to_lowercase();
    }

    /// Contract accounts are written by the deploy path with the hex
    /// contract address as their common name.
    pub fn is_contract(&self) -> bool {
        let trimmed = self.cn.strip_prefix("0x").unwrap_or(&self.cn);
        trimmed.len() == 40 && trimmed.chars().all(|c| c.is_ascii_hexdigit())
    }

    pub fn authorized_register_user(&self) -> bool {
        self.is_admin
            && self
                .permissions
                .as_ref()
                .is_some_and(|p| p.enable_register_user)
    }

    pub fn authorized_register_domain(&self) -> bool {
        self.permissions
            .as_ref()
            .is_some_and(|p| p.enable_register_domain)
    }

    pub fn partner(&self) -> Option<PartnerData> {
        let raw = self.extensions.get(PARTNER_KEY)?;
        serde_json::from_slice(raw).ok()
    }

    pub fn lost(&self) -> Option<LostStore> {
        let raw = self.extensions.get(LOST_KEY)?;
        serde_json::from_slice(raw).ok()
    }
}

/// Domain record: its admin's common name and the height it was created at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStore {
    pub admin: String,
    pub number: u64,
}

/// `sub` is a sub-domain of `domain` iff it ends with `"." + domain`.
pub fn is_sub_domain(domain: &str, sub: &str) -> bool {
    sub.ends_with(&format!(".{domain}"))
}

/// Operations carried in `tx.input` for the account and lost interpreters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountOp {
    RegisterAccount,
    RegisterDomain,
    FrozenAccount,
    UpdateDataPermission,
    SetPartner,
    LostRequest,
    FoundRequest,
    LostReset,
}

/// Envelope decoded from `tx.input`: an operation tag plus its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountOpData {
    pub operation: AccountOp,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl AccountOpData {
    pub fn new<T: Serialize>(operation: AccountOp, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(AccountOpData {
            operation,
            data: serde_json::to_value(payload)?,
        })
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(input: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(input)
    }

    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrozenAccountData {
    pub cn: String,
    pub domain: String,
    pub frozen: bool,
}

impl FrozenAccountData {
    pub fn normalize(&mut self) {
        self.cn = self.cn.to_lowercase();
        self.domain = self.domain.to_lowercase();
    }

    pub fn account_name(&self) -> String {
        format!("{}@{}", self.cn, self.domain)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePermissionData {
    pub cn: String,
    pub domain: String,
    pub permissions: Permissions,
}

impl UpdatePermissionData {
    pub fn normalize(&mut self) {
        self.cn = self.cn.to_lowercase();
        self.domain = self.domain.to_lowercase();
    }

    pub fn account_name(&self) -> String {
        format!("{}@{}", self.cn, self.domain)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerData {
    pub cn: String,
    pub domain: String,
}

impl PartnerData {
    pub fn normalize(&mut self) {
        self.cn = self.cn.to_lowercase();
        self.domain = self.domain.to_lowercase();
    }

    pub fn account_name(&self) -> String {
        format!("{}@{}", self.cn, self.domain)
    }
}

/// Recovery request a partner files on behalf of a lost account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LostRequest {
    pub cn: String,
    pub domain: String,
    pub recover_addr: Address,
}

impl LostRequest {
    pub fn normalize(&mut self) {
        self.cn = self.cn.to_lowercase();
        self.domain = self.domain.to_lowercase();
    }

    pub fn account_name(&self) -> String {
        format!("{}@{}", self.cn, self.domain)
    }
}

/// Pending recovery stored under the lost account; `timestamp` is the
/// earliest header time at which the claim may succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LostStore {
    pub request: LostRequest,
    pub timestamp: u64,
}
