use chain5j_common::types::Log;
use chain5j_common::{Address, H256, U256};
use chain5j_storage::error::StoreError;
use chain5j_storage::{EthAccount, StateSnapshot, Store};

use crate::state::StateView;

struct Checkpoint {
    world: StateSnapshot,
    logs_len: usize,
    refund: u64,
}

/// Mutable overlay over the EVM-address account state.
pub struct EvmState {
    store: Store,
    world: StateSnapshot,
    logs: Vec<Log>,
    refund: u64,
    tx_hash: H256,
    block_hash: H256,
    tx_index: u64,
    checkpoints: Vec<Checkpoint>,
}

impl EvmState {
    pub fn new(store: Store, root: H256) -> Result<Self, StoreError> {
        let world = store.state_at(root)?;
        Ok(EvmState {
            store,
            world,
            logs: Vec::new(),
            refund: 0,
            tx_hash: H256::zero(),
            block_hash: H256::zero(),
            tx_index: 0,
            checkpoints: Vec::new(),
        })
    }

    fn entry(&mut self, address: Address) -> &mut EthAccount {
        self.world.eth_accounts.entry(address).or_default()
    }
}

impl StateView for EvmState {
    fn balance(&self, address: Address) -> U256 {
        self.world
            .eth_accounts
            .get(&address)
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    fn set_balance(&mut self, address: Address, balance: U256) {
        self.entry(address).balance = balance;
    }

    fn add_balance(&mut self, address: Address, amount: U256) {
        let account = self.entry(address);
        account.balance = account.balance.saturating_add(amount);
    }

    fn sub_balance(&mut self, address: Address, amount: U256) {
        let account = self.entry(address);
        account.balance = account.balance.saturating_sub(amount);
    }

    fn nonce(&self, address: Address) -> u64 {
        self.world
            .eth_accounts
            .get(&address)
            .map(|a| a.nonce)
            .unwrap_or_default()
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.entry(address).nonce = nonce;
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> EvmState {
        let store = Store::new().expect("store");
        EvmState::new(store, H256::zero()).expect("state")
    }

    #[test]
    fn balances_default_to_zero() {
        let state = state();
        assert!(state.balance(Address::repeat_byte(0x01)).is_zero());
        assert_eq!(state.nonce(Address::repeat_byte(0x01)), 0);
    }

    #[test]
    fn snapshot_revert_round_trip() {
        let mut state = state();
        let address = Address::repeat_byte(0x05);
        state.set_balance(address, U256::from(100));
        let before = state.intermediate_root();
        let token = state.snapshot();
        state.sub_balance(address, U256::from(60));
        state.set_nonce(address, 1);
        state.revert_to(token);
        assert_eq!(state.intermediate_root(), before);
    }

    #[test]
    fn nested_snapshots_revert_independently() {
        let mut state = state();
        let address = Address::repeat_byte(0x05);
        state.set_balance(address, U256::from(10));
        let outer = state.snapshot();
        state.add_balance(address, U256::from(1));
        let inner = state.snapshot();
        state.add_balance(address, U256::from(1));
        state.revert_to(inner);
        assert_eq!(state.balance(address), U256::from(11));
        state.revert_to(outer);
        assert_eq!(state.balance(address), U256::from(10));
    }
}
