use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use once_cell::sync::OnceCell;
use rlp::RlpStream;
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize, ser::SerializeStruct};

use crate::crypto::{self, EcdsaError, Signature, keccak};

/// Pool-visible transaction kind; anything else is rejected at ingress.
pub const STATE_TX_TYPE: &str = "STATE";

/// Wire-exposed interpreter tags. The exact bytes are part of the protocol.
pub const BASE_INTERPRETER: &str = "chain5j.base";
pub const ACCOUNT_INTERPRETER: &str = "chain5j.account";
pub const LOST_INTERPRETER: &str = "chain5j.lost";
pub const EVM_INTERPRETER: &str = "chain5j.evm";
pub const CA_INTERPRETER: &str = "chain5j.ca";
pub const ETHEREUM_INTERPRETER: &str = "chain5j.ethereum";
pub const PERMISSION_INTERPRETER: &str = "chain5j.permission";

/// A signed state transaction.
///
/// The record is immutable once signed: signer, hash and encoded size are
/// computed lazily and cached. Identity is the *signed* hash, which covers
/// every field including the signature, so two transactions with identical
/// payloads but different signatures have distinct hashes. The *raw* hash
/// excludes the signature and is the digest that gets signed.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "TxPayload")]
pub struct Transaction {
    from: String,
    to: String,
    interpreter: String,
    nonce: u64,
    gas_limit: u64,
    gas_price: u64,
    value: U256,
    input: Bytes,
    deadline: u64,
    extra_hash: H256,
    signature: Option<Signature>,
    /// Visible to the submitting node only; excluded from signing, covered
    /// indirectly through `extra_hash`.
    extra: Bytes,

    signer: OnceCell<Address>,
    hash: OnceCell<H256>,
    size: OnceCell<usize>,
}

/// Wire shape of a transaction; caches are rebuilt on decode.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxPayload {
    from: String,
    to: String,
    interpreter: String,
    nonce: u64,
    #[serde(default)]
    gas_limit: u64,
    #[serde(default)]
    gas_price: u64,
    #[serde(default)]
    value: U256,
    #[serde(default)]
    input: Bytes,
    #[serde(default)]
    deadline: u64,
    #[serde(default)]
    extra_hash: H256,
    #[serde(default)]
    signature: Option<Signature>,
    #[serde(default)]
    extra: Bytes,
}

impl From<TxPayload> for Transaction {
    fn from(data: TxPayload) -> Self {
        Transaction {
            from: data.from.to_lowercase(),
            to: data.to.to_lowercase(),
            interpreter: data.interpreter,
            nonce: data.nonce,
            gas_limit: data.gas_limit,
            gas_price: data.gas_price,
            value: data.value,
            input: data.input,
            deadline: data.deadline,
            extra_hash: data.extra_hash,
            signature: data.signature,
            extra: data.extra,
            signer: OnceCell::new(),
            hash: OnceCell::new(),
            size: OnceCell::new(),
        }
    }
}

impl Serialize for Transaction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Transaction", 12)?;
        state.serialize_field("from", &self.from)?;
        state.serialize_field("to", &self.to)?;
        state.serialize_field("interpreter", &self.interpreter)?;
        state.serialize_field("nonce", &self.nonce)?;
        state.serialize_field("gasLimit", &self.gas_limit)?;
        state.serialize_field("gasPrice", &self.gas_price)?;
        state.serialize_field("value", &self.value)?;
        state.serialize_field("input", &self.input)?;
        state.serialize_field("deadline", &self.deadline)?;
        state.serialize_field("extraHash", &self.extra_hash)?;
        state.serialize_field("signature", &self.signature)?;
        state.serialize_field("hash", &self.hash())?;
        state.end()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Transaction {}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from: &str,
        to: &str,
        interpreter: &str,
        nonce: u64,
        gas_price: u64,
        gas_limit: u64,
        value: U256,
        input: Bytes,
        deadline: u64,
        extra: Bytes,
    ) -> Self {
        let interpreter = if interpreter.is_empty() {
            BASE_INTERPRETER.to_string()
        } else {
            interpreter.to_string()
        };
        Transaction {
            from: from.to_lowercase(),
            to: to.to_lowercase(),
            interpreter,
            nonce,
            gas_limit,
            gas_price,
            value,
            extra_hash: if extra.is_empty() {
                H256::zero()
            } else {
                keccak(&extra)
            },
            input,
            deadline,
            signature: None,
            extra,
            signer: OnceCell::new(),
            hash: OnceCell::new(),
            size: OnceCell::new(),
        }
    }

    pub fn tx_type(&self) -> &'static str {
        STATE_TX_TYPE
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn gas_price(&self) -> u64 {
        self.gas_price
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn input(&self) -> &Bytes {
        &self.input
    }

    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Total funds the sender must hold: `value + gas_limit * gas_price`.
    pub fn cost(&self) -> U256 {
        self.value + U256::from(self.gas_limit) * U256::from(self.gas_price)
    }

    /// Digest that gets signed: every field except the signature, as a
    /// length-prefixed list terminated by an empty item.
    pub fn raw_hash(&self) -> H256 {
        keccak(self.encode_fields(None))
    }

    /// Identity digest: the same list with the signature in the final slot.
    pub fn hash(&self) -> H256 {
        *self
            .hash
            .get_or_init(|| keccak(self.encode_fields(self.signature.as_ref())))
    }

    /// Recovers and caches the signing address.
    pub fn signer(&self) -> Result<Address, EcdsaError> {
        if let Some(address) = self.signer.get() {
            return Ok(*address);
        }
        let signature = self.signature.as_ref().ok_or(EcdsaError::MissingSignature)?;
        let address = crypto::recover_address(&self.raw_hash(), signature)?;
        tracing::debug!(addr = %address, "tx from addr");
        Ok(*self.signer.get_or_init(|| address))
    }

    /// Recovers the signing public key; used for peer-identity derivation.
    pub fn public_key(&self) -> Result<secp256k1::PublicKey, EcdsaError> {
        let signature = self.signature.as_ref().ok_or(EcdsaError::MissingSignature)?;
        crypto::recover_public_key(&self.raw_hash(), signature)
    }

    /// Signs the raw hash, unless a signature is already attached.
    pub fn sign(&mut self, secret: &SecretKey) -> Signature {
        if let Some(signature) = self.signature {
            return signature;
        }
        let signature = crypto::sign_hash(&self.raw_hash(), secret);
        self.signature = Some(signature);
        self.hash = OnceCell::new();
        self.size = OnceCell::new();
        signature
    }

    /// Encoded size in bytes, cached after the first computation.
    pub fn size(&self) -> usize {
        *self
            .size
            .get_or_init(|| self.encode_fields(self.signature.as_ref()).len())
    }

    /// Per-sender flush order: ascending nonce, ties broken by the higher
    /// gas price. Cross-sender comparisons carry no meaning.
    pub fn less(&self, other: &Transaction) -> bool {
        if self.nonce != other.nonce {
            return self.nonce < other.nonce;
        }
        self.gas_price > other.gas_price
    }

    fn encode_fields(&self, signature: Option<&Signature>) -> Vec<u8> {
        let mut stream = RlpStream::new_list(11);
        stream.append(&self.from);
        stream.append(&self.to);
        stream.append(&self.interpreter);
        stream.append(&self.nonce);
        stream.append(&self.gas_limit);
        stream.append(&self.gas_price);
        stream.append(&self.value);
        stream.append(&self.input.to_vec());
        stream.append(&self.deadline);
        stream.append(&self.extra_hash);
        match signature {
            Some(signature) => stream.append(&signature.to_bytes().to_vec()),
            None => stream.append_empty_data(),
        };
        stream.out().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn secret(fill: u8) -> SecretKey {
        let mut raw = [fill; 32];
        raw[0] = 1;
        SecretKey::from_slice(&raw).expect("valid secret")
    }

    fn transfer(nonce: u64, gas_price: u64) -> Transaction {
        Transaction::new(
            "Alice@Root",
            "bob@root",
            "chain5j.base",
            nonce,
            gas_price,
            21_000,
            U256::from(10),
            Bytes::new(),
            0,
            Bytes::new(),
        )
    }

    #[test]
    fn identifiers_are_lowercased() {
        let tx = transfer(0, 0);
        assert_eq!(tx.from(), "alice@root");
        assert_eq!(tx.to(), "bob@root");
    }

    #[test]
    fn cost_includes_gas_budget() {
        let tx = transfer(0, 2);
        assert_eq!(tx.cost(), U256::from(10 + 21_000 * 2));
    }

    #[test]
    fn signer_round_trips_through_recovery() {
        let secret = secret(0x11);
        let mut tx = transfer(0, 0);
        tx.sign(&secret);
        let expected =
            crypto::public_key_to_address(&secret.public_key(secp256k1::SECP256K1));
        assert_eq!(tx.signer().expect("signed"), expected);
    }

    #[test]
    fn distinct_signatures_give_distinct_hashes() {
        let mut a = transfer(0, 0);
        let mut b = transfer(0, 0);
        assert_eq!(a.raw_hash(), b.raw_hash());
        a.sign(&secret(0x11));
        b.sign(&secret(0x22));
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn signing_is_idempotent() {
        let mut tx = transfer(0, 0);
        let first = tx.sign(&secret(0x11));
        let second = tx.sign(&secret(0x22));
        assert_eq!(first, second);
    }

    #[test]
    fn ordering_prefers_low_nonce_then_high_price() {
        assert!(transfer(0, 0).less(&transfer(1, 100)));
        assert!(transfer(3, 100).less(&transfer(3, 50)));
        assert!(!transfer(3, 50).less(&transfer(3, 100)));
    }

    #[test]
    fn json_round_trip_preserves_identity() {
        let mut tx = transfer(7, 3);
        tx.sign(&secret(0x33));
        let encoded = serde_json::to_vec(&tx).expect("encode");
        let decoded: Transaction = serde_json::from_slice(&encoded).expect("decode");
        assert_eq!(decoded.hash(), tx.hash());
        assert_eq!(decoded.nonce(), 7);
        assert_eq!(decoded.signer().expect("signed"), tx.signer().expect("signed"));
    }

    #[test]
    fn extra_hash_commits_to_extra_bytes() {
        let with_extra = Transaction::new(
            "a@root",
            "b@root",
            "chain5j.base",
            0,
            0,
            21_000,
            U256::zero(),
            Bytes::new(),
            0,
            Bytes::from_static(&hex!("c0ffee")),
        );
        let without = transfer(0, 0);
        assert_ne!(with_extra.raw_hash(), without.raw_hash());
    }
}
