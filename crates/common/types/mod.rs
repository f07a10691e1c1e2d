mod account;
mod block;
mod config;
mod receipt;
mod transaction;

pub use account::{
    AccountOp, AccountOpData, AccountStore, DomainStore, FrozenAccountData, LOST_KEY,
    LostRequest, LostStore, MAX_ACCOUNT_NAME_LEN, MAX_DOMAIN_LEN, MIN_ACCOUNT_NAME_LEN,
    MIN_DOMAIN_LEN, PARTNER_KEY, PartnerData, Permissions, UpdatePermissionData, is_sub_domain,
};
pub use block::{Block, BlockHeader, STATE_SECTION, StateRoots};
pub use config::{ChainConfig, TxPoolConfig};
pub use receipt::{Log, Receipt, bloom_from_logs};
pub use transaction::{
    ACCOUNT_INTERPRETER, BASE_INTERPRETER, CA_INTERPRETER, ETHEREUM_INTERPRETER, EVM_INTERPRETER,
    LOST_INTERPRETER, PERMISSION_INTERPRETER, STATE_TX_TYPE, Transaction,
};
