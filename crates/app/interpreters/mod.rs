//! Per-transaction-kind interpreters.

mod account;
mod base;
mod ca;
mod ethereum;
mod evm;
mod lost;
mod permission;

pub use account::AccountInterpreter;
pub use base::BaseInterpreter;
pub use ca::CaInterpreter;
pub use ethereum::EthereumInterpreter;
pub use evm::EvmInterpreter;
pub use lost::LostInterpreter;
pub use permission::{PermissionInterpreter, PermissionOp, PermissionOpData, RoleType};
