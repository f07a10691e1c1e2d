use std::collections::BTreeMap;

use bytes::Bytes;
use ethereum_types::H256;
use serde::{Deserialize, Serialize};

use crate::crypto::keccak;
use crate::types::Transaction;

/// Section tag of the account-state root inside [`StateRoots`].
pub const STATE_SECTION: &str = "STATE";

/// Typed map from state-section tag to root hash.
///
/// Headers carry the encoded form; the state application only reads the
/// `"STATE"` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRoots(BTreeMap<String, H256>);

impl StateRoots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, section: &str) -> H256 {
        self.0.get(section).copied().unwrap_or_default()
    }

    pub fn set(&mut self, section: &str, root: H256) {
        self.0.insert(section.to_string(), root);
    }

    pub fn state_root(&self) -> H256 {
        self.get(STATE_SECTION)
    }

    pub fn encode(&self) -> Bytes {
        // Serialization of a string-keyed map cannot fail.
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        if raw.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(raw)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub parent_hash: H256,
    pub height: u64,
    /// Encoded [`StateRoots`] map.
    #[serde(default)]
    pub state_roots: Bytes,
    pub timestamp: u64,
    #[serde(default)]
    pub gas_used: u64,
    #[serde(default)]
    pub gas_limit: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> H256 {
        keccak(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn state_roots(&self) -> StateRoots {
        StateRoots::decode(&self.state_roots).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Block {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> H256 {
        self.header.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_round_trip_through_header() {
        let mut roots = StateRoots::new();
        roots.set(STATE_SECTION, H256::repeat_byte(0x42));
        let header = BlockHeader {
            height: 7,
            state_roots: roots.encode(),
            ..Default::default()
        };
        assert_eq!(header.state_roots().state_root(), H256::repeat_byte(0x42));
    }

    #[test]
    fn missing_section_reads_as_zero() {
        assert_eq!(StateRoots::new().state_root(), H256::zero());
        assert_eq!(
            StateRoots::decode(b"").expect("empty ok").state_root(),
            H256::zero()
        );
    }

    #[test]
    fn header_hash_commits_to_contents() {
        let base = BlockHeader {
            height: 1,
            timestamp: 1000,
            ..Default::default()
        };
        let mut other = base.clone();
        other.timestamp = 1001;
        assert_ne!(base.hash(), other.hash());
    }
}
