//! Node-level capabilities injected into the interpreter registry.
//!
//! The permission interpreter mutates node membership through
//! [`NodePermission`] and resolves peer identities through [`NodeKey`];
//! both are provided by the embedding node, never reached through globals.

use chain5j_common::Address;
use secp256k1::PublicKey;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: String,
    pub height: u64,
}

/// Peer-permission registry of the node.
pub trait NodePermission: Send + Sync {
    fn is_admin(&self, address: &str, height: u64) -> bool;
    fn add_supervisor(&self, address: Address, info: MemberInfo) -> Result<(), AppError>;
    fn del_supervisor(&self, address: Address) -> Result<(), AppError>;
}

/// Node-key material: maps a transaction's public key to a peer id.
pub trait NodeKey: Send + Sync {
    fn id_from_pub(&self, public_key: &PublicKey) -> Result<String, AppError>;
}
