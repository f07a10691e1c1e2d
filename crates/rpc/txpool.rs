//! Handlers for the `txpool` namespace.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::utils::RpcErr;
use crate::{RpcApiContext, RpcHandler};

#[derive(Debug, Serialize)]
pub struct NonceHashInfo {
    pub nonce: u64,
    pub hash: String,
}

#[derive(Debug, Default, Serialize)]
pub struct AddressStatus {
    pub pending: Vec<NonceHashInfo>,
    pub count: u64,
}

/// Pool snapshot: total count plus per-sender pending entries sorted by
/// nonce.
#[derive(Debug, Default, Serialize)]
pub struct TxPoolStatus {
    pub count: u64,
    pub pending: BTreeMap<String, AddressStatus>,
}

pub struct TxPoolStatusRequest;

impl RpcHandler for TxPoolStatusRequest {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(TxPoolStatusRequest)
    }

    async fn handle(&self, context: RpcApiContext) -> Result<Value, RpcErr> {
        let mut status = TxPoolStatus::default();
        for tx in context.pool.content()? {
            let entry = status
                .pending
                .entry(tx.from().to_string())
                .or_default();
            entry.pending.push(NonceHashInfo {
                nonce: tx.nonce(),
                hash: format!("{:#x}", tx.hash()),
            });
            entry.count += 1;
            status.count += 1;
        }
        for entry in status.pending.values_mut() {
            entry.pending.sort_by_key(|info| info.nonce);
        }
        Ok(serde_json::to_value(status)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_sorted_pending() {
        let status = TxPoolStatus {
            count: 2,
            pending: BTreeMap::from([(
                "alice@root".to_string(),
                AddressStatus {
                    pending: vec![
                        NonceHashInfo {
                            nonce: 0,
                            hash: "0x01".to_string(),
                        },
                        NonceHashInfo {
                            nonce: 1,
                            hash: "0x02".to_string(),
                        },
                    ],
                    count: 2,
                },
            )]),
        };
        let value = serde_json::to_value(&status).expect("encode");
        assert_eq!(value["count"], 2);
        assert_eq!(value["pending"]["alice@root"]["pending"][0]["nonce"], 0);
    }
}
