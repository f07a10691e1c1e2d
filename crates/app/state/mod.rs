//! State views over the versioned store.
//!
//! A [`StateView`] is the per-block mutable face of the account state: an
//! overlay on top of the snapshot at `pre_root` with checkpoint/revert
//! support, log recording and gas-refund tracking. Two concrete variants
//! exist — [`NativeState`] keyed by `cn@domain` names and [`EvmState`]
//! keyed by 20-byte addresses — selected once at context construction;
//! downstream code never branches on the mode.

mod evm;
mod native;

use chain5j_common::types::Log;
use chain5j_common::{Address, H256, U256};
use chain5j_storage::error::StoreError;

pub use evm::EvmState;
pub use native::NativeState;

/// Uniform facade both state back-ends implement.
///
/// The address-keyed operations are the surface the EVM state transition
/// drives; the native variant resolves addresses to its name-keyed records.
pub trait StateView: Send {
    fn balance(&self, address: Address) -> U256;
    fn set_balance(&mut self, address: Address, balance: U256);
    fn add_balance(&mut self, address: Address, amount: U256);
    fn sub_balance(&mut self, address: Address, amount: U256);
    fn nonce(&self, address: Address) -> u64;
    fn set_nonce(&mut self, address: Address, nonce: u64);

    fn refund(&self) -> u64;
    fn add_refund(&mut self, amount: u64);

    fn add_log(&mut self, log: Log);
    fn get_logs(&self, tx_hash: H256) -> Vec<Log>;

    /// Sets the log-recording keys for the transaction about to execute.
    /// `block_hash` is the zero hash during Prepare.
    fn prepare(&mut self, tx_hash: H256, block_hash: H256, index: u64);

    /// Returns an opaque token restoring the current state via
    /// [`StateView::revert_to`]. Tokens are single-use.
    fn snapshot(&mut self) -> usize;
    fn revert_to(&mut self, token: usize);

    /// Root the overlay would commit to, computed in memory.
    fn intermediate_root(&self) -> H256;
    /// Persists the overlay and returns the new root.
    fn commit(&mut self) -> Result<H256, StoreError>;
    /// Seals the per-transaction bookkeeping (checkpoints, refund counter).
    fn finalise(&mut self);

    /// Access to the richer native schema; `None` on the EVM back-end.
    fn native_mut(&mut self) -> Option<&mut NativeState> {
        None
    }
}
