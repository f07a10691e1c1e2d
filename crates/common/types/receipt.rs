use bytes::Bytes;
use ethereum_types::{Address, Bloom, BloomInput, H256};
use serde::{Deserialize, Serialize};

/// Log entry emitted during execution.
///
/// `block_height` and `block_hash` are zero while the block is being
/// prepared and are stamped during commit, once the block is sealed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(default)]
    pub data: Bytes,
    pub block_height: u64,
    pub block_hash: H256,
    pub transaction_hash: H256,
    pub transaction_index: u64,
}

/// Execution outcome of a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// 1 on success, 0 on a recorded execution failure.
    pub status: u8,
    pub cumulative_gas_used: u64,
    pub gas_used: u64,
    pub transaction_hash: H256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub logs: Vec<Log>,
    #[serde(default)]
    pub logs_bloom: Bloom,
}

impl Receipt {
    pub fn new(failed: bool, cumulative_gas_used: u64) -> Self {
        Receipt {
            status: if failed { 0 } else { 1 },
            cumulative_gas_used,
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

/// 2048-bit bloom over every log address and topic.
pub fn bloom_from_logs(logs: &[Log]) -> Bloom {
    let mut bloom = Bloom::zero();
    for log in logs {
        bloom.accrue(BloomInput::Raw(log.address.as_bytes()));
        for topic in &log.topics {
            bloom.accrue(BloomInput::Raw(topic.as_bytes()));
        }
    }
    bloom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tracks_failure() {
        assert_eq!(Receipt::new(false, 21_000).status, 1);
        assert_eq!(Receipt::new(true, 21_000).status, 0);
    }

    #[test]
    fn bloom_covers_address_and_topics() {
        let log = Log {
            address: Address::repeat_byte(0xaa),
            topics: vec![H256::repeat_byte(0x01)],
            ..Default::default()
        };
        let bloom = bloom_from_logs(std::slice::from_ref(&log));
        assert!(bloom.contains_input(BloomInput::Raw(log.address.as_bytes())));
        assert!(bloom.contains_input(BloomInput::Raw(log.topics[0].as_bytes())));
        assert!(!bloom.contains_input(BloomInput::Raw(
            Address::repeat_byte(0xbb).as_bytes()
        )));
    }
}
