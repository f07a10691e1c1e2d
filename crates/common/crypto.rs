//! Keccak hashing and recoverable ECDSA signatures.
//!
//! Signatures are serialized as `r || s || v` (65 bytes). Addresses are the
//! last 20 bytes of the keccak of the uncompressed public key.

use ethereum_types::{Address, H256};
use secp256k1::{
    Message, PublicKey, SECP256K1, SecretKey,
    ecdsa::{RecoverableSignature, RecoveryId},
};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

#[derive(Debug, thiserror::Error)]
pub enum EcdsaError {
    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),
    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),
    #[error("transaction is not signed")]
    MissingSignature,
}

pub fn keccak<T: AsRef<[u8]>>(data: T) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(data.as_ref());
    H256::from_slice(&hasher.finalize())
}

/// A recoverable ECDSA signature over a 32-byte digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub r: H256,
    pub s: H256,
    pub v: u8,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(self.r.as_bytes());
        out[32..64].copy_from_slice(self.s.as_bytes());
        out[64] = self.v;
        out
    }

    fn compact(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(self.r.as_bytes());
        out[32..].copy_from_slice(self.s.as_bytes());
        out
    }
}

pub fn sign_hash(hash: &H256, secret: &SecretKey) -> Signature {
    let message = Message::from_digest(hash.0);
    let signature = SECP256K1.sign_ecdsa_recoverable(&message, secret);
    let (recovery_id, data) = signature.serialize_compact();
    Signature {
        r: H256::from_slice(&data[..32]),
        s: H256::from_slice(&data[32..]),
        v: i32::from(recovery_id) as u8,
    }
}

/// Recovers the signing public key from a digest and its signature.
pub fn recover_public_key(hash: &H256, signature: &Signature) -> Result<PublicKey, EcdsaError> {
    let recovery_id = RecoveryId::try_from(signature.v as i32)
        .map_err(|_| EcdsaError::InvalidRecoveryId(signature.v))?;
    let signature = RecoverableSignature::from_compact(&signature.compact(), recovery_id)?;
    let message = Message::from_digest(hash.0);
    Ok(SECP256K1.recover_ecdsa(&message, &signature)?)
}

/// Recovers the signing address from a digest and its signature.
pub fn recover_address(hash: &H256, signature: &Signature) -> Result<Address, EcdsaError> {
    Ok(public_key_to_address(&recover_public_key(hash, signature)?))
}

pub fn public_key_to_address(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    // Skip the 0x04 SEC1 tag byte.
    let digest = keccak(&uncompressed[1..]);
    Address::from_slice(&digest.as_bytes()[12..])
}

/// Maps a textual account identifier into the 20-byte EVM address space.
///
/// Hex identifiers parse directly; domain names hash through keccak.
pub fn domain_to_address(name: &str) -> Address {
    let trimmed = name.strip_prefix("0x").unwrap_or(name);
    if trimmed.len() == 40 {
        if let Ok(raw) = hex::decode(trimmed) {
            return Address::from_slice(&raw);
        }
    }
    let digest = keccak(name.as_bytes());
    Address::from_slice(&digest.as_bytes()[12..])
}
