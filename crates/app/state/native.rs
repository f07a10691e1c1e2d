use chain5j_common::crypto::domain_to_address;
use chain5j_common::types::{
    AccountStore, DomainStore, LOST_KEY, Log, LostStore, PARTNER_KEY, PartnerData, Permissions,
};
use chain5j_common::{Address, H256, U256};
use chain5j_storage::error::StoreError;
use chain5j_storage::{StateSnapshot, Store};
use rustc_hash::FxHashMap;

use crate::error::AppError;
use crate::state::StateView;

struct Checkpoint {
    world: StateSnapshot,
    logs_len: usize,
    refund: u64,
}

/// Mutable overlay over the native (`cn@domain`) account state.
///
/// Accounts are keyed by name; the EVM-facing address operations resolve
/// through the name an address maps to, falling back to hex-named accounts
/// (the shape contract accounts are stored under).
pub struct NativeState {
    store: Store,
    world: StateSnapshot,
    address_names: FxHashMap<Address, String>,
    logs: Vec<Log>,
    refund: u64,
    tx_hash: H256,
    block_hash: H256,
    tx_index: u64,
    checkpoints: Vec<Checkpoint>,
}

impl NativeState {
    pub fn new(store: Store, root: H256) -> Result<Self, StoreError> {
        let world = store.state_at(root)?;
        let mut address_names = FxHashMap::default();
        for name in world.accounts.keys() {
            address_names.insert(domain_to_address(name), name.clone());
        }
        Ok(NativeState {
            store,
            world,
            address_names,
            logs: Vec::new(),
            refund: 0,
            tx_hash: H256::zero(),
            block_hash: H256::zero(),
            tx_index: 0,
            checkpoints: Vec::new(),
        })
    }

    fn resolve(&self, address: Address) -> String {
        self.address_names
            .get(&address)
            .cloned()
            .unwrap_or_else(|| format!("{address:#x}"))
    }

    fn ensure_account(&mut self, name: &str) -> &mut AccountStore {
        self.address_names
            .entry(domain_to_address(name))
            .or_insert_with(|| name.to_string());
        self.world
            .accounts
            .entry(name.to_string())
            .or_insert_with(|| {
                let (cn, domain) = name.rsplit_once('@').unwrap_or((name, ""));
                AccountStore {
                    cn: cn.to_string(),
                    domain: domain.to_string(),
                    ..Default::default()
                }
            })
    }

    pub fn get_account(&self, name: &str) -> Option<AccountStore> {
        self.world.accounts.get(name).cloned()
    }

    pub fn account_balance(&self, name: &str) -> U256 {
        self.world
            .accounts
            .get(name)
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    pub fn set_account_balance(&mut self, name: &str, balance: U256) {
        self.ensure_account(name).balance = balance;
    }

    pub fn add_account_balance(&mut self, name: &str, amount: U256) {
        let account = self.ensure_account(name);
        account.balance = account.balance.saturating_add(amount);
    }

    pub fn sub_account_balance(&mut self, name: &str, amount: U256) {
        let account = self.ensure_account(name);
        account.balance = account.balance.saturating_sub(amount);
    }

    pub fn account_nonce(&self, name: &str) -> u64 {
        self.world
            .accounts
            .get(name)
            .map(|a| a.nonce)
            .unwrap_or_default()
    }

    pub fn set_account_nonce(&mut self, name: &str, nonce: u64) {
        self.ensure_account(name).nonce = nonce;
    }

    /// Inserts a full account record and indexes its addresses.
    pub fn create_account(&mut self, account: AccountStore) {
        let name = account.account_name();
        for address in &account.addresses {
            self.world.address_index.insert(*address);
        }
        self.address_names
            .insert(domain_to_address(&name), name.clone());
        self.world.accounts.insert(name, account);
    }

    pub fn set_frozen(&mut self, name: &str, frozen: bool) {
        if let Some(account) = self.world.accounts.get_mut(name) {
            account.is_frozen = frozen;
        }
    }

    pub fn update_permission(&mut self, name: &str, permissions: Permissions) {
        if let Some(account) = self.world.accounts.get_mut(name) {
            account.permissions = Some(permissions);
        }
    }

    pub fn set_partner(&mut self, name: &str, partner: &PartnerData) -> Result<(), AppError> {
        let raw = serde_json::to_vec(partner)
            .map_err(|e| AppError::InvalidInput(e.to_string()))?;
        self.ensure_account(name)
            .extensions
            .insert(PARTNER_KEY.to_string(), raw.into());
        Ok(())
    }

    pub fn set_lost(&mut self, name: &str, lost: Option<&LostStore>) -> Result<(), AppError> {
        match lost {
            Some(store) => {
                let raw = serde_json::to_vec(store)
                    .map_err(|e| AppError::InvalidInput(e.to_string()))?;
                self.ensure_account(name)
                    .extensions
                    .insert(LOST_KEY.to_string(), raw.into());
            }
            None => {
                if let Some(account) = self.world.accounts.get_mut(name) {
                    account.extensions.remove(LOST_KEY);
                }
            }
        }
        Ok(())
    }

    /// Replaces the account's addresses with a single recovery address.
    pub fn set_address(&mut self, name: &str, address: Address) {
        let previous = match self.world.accounts.get_mut(name) {
            Some(account) => std::mem::replace(&mut account.addresses, vec![address]),
            None => return,
        };
        for old in previous {
            self.world.address_index.remove(&old);
        }
        self.world.address_index.insert(address);
    }

    pub fn add_domain(&mut self, domain: &str, store: DomainStore) {
        self.world.domains.insert(domain.to_string(), store);
    }

    pub fn get_domain(&self, domain: &str) -> Option<DomainStore> {
        self.world.domains.get(domain).cloned()
    }

    pub fn address_exists(&self, address: &Address) -> bool {
        self.world.address_index.contains(address)
    }
}

impl StateView for NativeState {
    fn balance(&self, address: Address) -> U256 {
        self.account_balance(&self.resolve(address))
    }

    fn set_balance(&mut self, address: Address, balance: U256) {
        let name = self.resolve(address);
        self.set_account_balance(&name, balance);
    }

    fn add_balance(&mut self, address: Address, amount: U256) {
        let name = self.resolve(address);
        self.add_account_balance(&name, amount);
    }

    fn sub_balance(&mut self, address: Address, amount: U256) {
        let name = self.resolve(address);
        self.sub_account_balance(&name, amount);
    }

    fn nonce(&self, address: Address) -> u64 {
        self.account_nonce(&self.resolve(address))
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        let name = self.resolve(address);
        self.set_account_nonce(&name, nonce);
    }

    fn refund(&self) -> u64 {
        self.refund
    }

    fn add_refund(&mut self, amount: u64) {
        self.refund += amount;
    }

    fn add_log(&mut self, mut log: Log) {
        log.transaction_hash = self.tx_hash;
        log.block_hash = self.block_hash;
        log.transaction_index = self.tx_index;
        self.logs.push(log);
    }

    fn get_logs(&self, tx_hash: H256) -> Vec<Log> {
        self.logs
            .iter()
            .filter(|log| log.transaction_hash == tx_hash)
            .cloned()
            .collect()
    }

    fn prepare(&mut self, tx_hash: H256, block_hash: H256, index: u64) {
        self.tx_hash = tx_hash;
        self.block_hash = block_hash;
        self.tx_index = index;
    }

    fn snapshot(&mut self) -> usize {
        self.checkpoints.push(Checkpoint {
            world: self.world.clone(),
            logs_len: self.logs.len(),
            refund: self.refund,
        });
        self.checkpoints.len() - 1
    }

    fn revert_to(&mut self, token: usize) {
        if token >= self.checkpoints.len() {
            return;
        }
        let checkpoint = self
            .checkpoints
            .drain(token..)
            .next()
            .expect("token bounds checked");
        self.world = checkpoint.world;
        self.logs.truncate(checkpoint.logs_len);
        self.refund = checkpoint.refund;
    }

    fn intermediate_root(&self) -> H256 {
        Store::compute_root(&self.world)
    }

    fn commit(&mut self) -> Result<H256, StoreError> {
        self.store.commit_state(self.world.clone())
    }

    fn finalise(&mut self) {
        self.checkpoints.clear();
        self.refund = 0;
    }

    fn native_mut(&mut self) -> Option<&mut NativeState> {
        Some(self)
    }
}
