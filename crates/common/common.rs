//! # chain5j common
//!
//! Primitive and domain types shared across the chain5j state application:
//! transactions, accounts, receipts, block headers and the crypto helpers
//! they rely on.

pub mod crypto;
pub mod types;

pub use crypto::EcdsaError;
pub use ethereum_types::{Address, Bloom, BloomInput, H160, H256, U256};
