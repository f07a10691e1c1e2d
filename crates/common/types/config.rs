use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Chain-wide configuration the state application reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub chain_id: u64,
    pub chain_name: String,
    /// Maximum encoded transaction size accepted at ingress, in bytes.
    pub tx_size_limit: usize,
    pub block_gas_limit: u64,
    /// Selects the EVM-address state model; the native `cn@domain` model
    /// otherwise. Exactly one interpreter family is admitted per mode.
    pub use_ethereum: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            chain_id: 1,
            chain_name: "chain5j".to_string(),
            tx_size_limit: 32 * 1024,
            block_gas_limit: 5_000_000,
            use_ethereum: false,
        }
    }
}

/// Local transaction-pool limits.
#[derive(Debug, Clone)]
pub struct TxPoolConfig {
    /// Hard bound on the number of buffered transactions.
    pub capacity: usize,
    /// Entry lifetime before the pool evicts it.
    pub lifetime: Duration,
    /// Replacement price bump, in percent.
    pub price_bump: u64,
}

impl Default for TxPoolConfig {
    fn default() -> Self {
        TxPoolConfig {
            capacity: 10_000,
            lifetime: Duration::from_secs(60),
            price_bump: 10,
        }
    }
}
