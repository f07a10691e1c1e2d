//! Read-only queries at historical roots, and the deadline-bounded `call`.

use bytes::Bytes;
use chain5j_common::crypto::domain_to_address;
use chain5j_common::types::{AccountStore, BlockHeader, DomainStore, PartnerData};
use chain5j_common::{H256, U256};
use chain5j_storage::StateSnapshot;
use serde::Deserialize;
use std::time::Duration;
use tracing::trace;

use crate::error::AppError;
use crate::constants::DEFAULT_CALL_TIMEOUT;
use crate::interpreter::GasPool;
use crate::state_transition::apply_message;
use crate::vm::{VmBlockContext, VmMessage};
use crate::Application;

/// Block selector accepted by the query API: a height, the `latest` /
/// `pending` sentinels, or a block hash with optional canonicity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Latest,
    Pending,
    Hash {
        hash: H256,
        require_canonical: bool,
    },
}

impl Default for BlockRef {
    fn default() -> Self {
        BlockRef::Latest
    }
}

impl<'de> Deserialize<'de> for BlockRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct HashRef {
            block_hash: H256,
            #[serde(default)]
            require_canonical: bool,
        }

        let value = serde_json::Value::deserialize(deserializer)?;
        match &value {
            serde_json::Value::String(tag) => match tag.as_str() {
                "latest" => Ok(BlockRef::Latest),
                "pending" => Ok(BlockRef::Pending),
                other => {
                    let trimmed = other.strip_prefix("0x").unwrap_or(other);
                    u64::from_str_radix(trimmed, 16)
                        .map(BlockRef::Number)
                        .map_err(|_| {
                            serde::de::Error::custom(format!("invalid block ref: {other}"))
                        })
                }
            },
            serde_json::Value::Number(number) => number
                .as_u64()
                .map(BlockRef::Number)
                .ok_or_else(|| serde::de::Error::custom("invalid block number")),
            serde_json::Value::Object(_) => {
                let hash_ref: HashRef =
                    serde_json::from_value(value).map_err(serde::de::Error::custom)?;
                Ok(BlockRef::Hash {
                    hash: hash_ref.block_hash,
                    require_canonical: hash_ref.require_canonical,
                })
            }
            _ => Err(serde::de::Error::custom("invalid block ref")),
        }
    }
}

/// Read-only call request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMessage {
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub gas_limit: u64,
    #[serde(default)]
    pub gas_price: u64,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub input: Bytes,
}

impl Application {
    pub fn header_by_ref(&self, block_ref: &BlockRef) -> Result<BlockHeader, AppError> {
        match block_ref {
            BlockRef::Latest | BlockRef::Pending => {
                Ok(self.storage().current_block()?.header)
            }
            BlockRef::Number(height) => self
                .storage()
                .get_header_by_height(*height)?
                .ok_or(AppError::Store(
                    chain5j_storage::error::StoreError::HeaderNotFound,
                )),
            BlockRef::Hash {
                hash,
                require_canonical,
            } => {
                let header = self.storage().get_header_by_hash(*hash)?.ok_or(
                    AppError::Store(chain5j_storage::error::StoreError::HeaderNotFound),
                )?;
                if *require_canonical && !self.storage().is_canonical(*hash)? {
                    return Err(AppError::InvalidInput(
                        "hash is not currently canonical".to_string(),
                    ));
                }
                Ok(header)
            }
        }
    }

    fn snapshot_by_ref(&self, block_ref: &BlockRef) -> Result<StateSnapshot, AppError> {
        let header = self.header_by_ref(block_ref)?;
        Ok(self
            .storage()
            .state_at(header.state_roots().state_root())?)
    }

    pub fn get_balance(&self, account: &str, block_ref: &BlockRef) -> Result<U256, AppError> {
        let account = account.to_lowercase();
        let snapshot = self.snapshot_by_ref(block_ref)?;
        let balance = if self.config().use_ethereum {
            snapshot
                .eth_accounts
                .get(&domain_to_address(&account))
                .map(|a| a.balance)
                .unwrap_or_default()
        } else {
            snapshot
                .accounts
                .get(&account)
                .map(|a| a.balance)
                .unwrap_or_default()
        };
        Ok(balance)
    }

    /// Transaction count at the referenced block; the `pending` sentinel
    /// additionally consults the in-flight nonce queue.
    pub fn get_transaction_count(
        &self,
        account: &str,
        block_ref: &BlockRef,
    ) -> Result<u64, AppError> {
        let account = account.to_lowercase();
        let snapshot = self.snapshot_by_ref(block_ref)?;
        let nonce = if self.config().use_ethereum {
            snapshot
                .eth_accounts
                .get(&domain_to_address(&account))
                .map(|a| a.nonce)
                .unwrap_or_default()
        } else {
            snapshot
                .accounts
                .get(&account)
                .map(|a| a.nonce)
                .unwrap_or_default()
        };
        if *block_ref == BlockRef::Pending {
            return Ok(self.pending_nonce(&account)?.max(nonce));
        }
        Ok(nonce)
    }

    pub fn account_info(
        &self,
        account: &str,
        block_ref: &BlockRef,
    ) -> Result<AccountStore, AppError> {
        if self.config().use_ethereum {
            return Err(AppError::InvalidInput(
                "account queries are unavailable in ethereum mode".to_string(),
            ));
        }
        let snapshot = self.snapshot_by_ref(block_ref)?;
        snapshot
            .accounts
            .get(&account.to_lowercase())
            .cloned()
            .ok_or(AppError::AccountNotExists)
    }

    pub fn partner(
        &self,
        account: &str,
        block_ref: &BlockRef,
    ) -> Result<Option<PartnerData>, AppError> {
        Ok(self.account_info(account, block_ref)?.partner())
    }

    pub fn domain_info(
        &self,
        domain: &str,
        block_ref: &BlockRef,
    ) -> Result<DomainStore, AppError> {
        if self.config().use_ethereum {
            return Err(AppError::InvalidInput(
                "domain queries are unavailable in ethereum mode".to_string(),
            ));
        }
        let snapshot = self.snapshot_by_ref(block_ref)?;
        snapshot
            .domains
            .get(&domain.to_lowercase())
            .cloned()
            .ok_or(AppError::DomainNotFound)
    }

    /// Executes a read-only call against the referenced state with the
    /// default 5-second deadline.
    pub async fn call(
        &self,
        msg: CallMessage,
        block_ref: &BlockRef,
    ) -> Result<Bytes, AppError> {
        self.call_with_timeout(msg, block_ref, DEFAULT_CALL_TIMEOUT)
            .await
    }

    /// Executes a read-only call; when the deadline passes the VM is
    /// cancelled and the execution returns promptly.
    pub async fn call_with_timeout(
        &self,
        msg: CallMessage,
        block_ref: &BlockRef,
        timeout: Duration,
    ) -> Result<Bytes, AppError> {
        let started = std::time::Instant::now();
        let header = self.header_by_ref(block_ref)?;
        let mut context = self.new_context("api_call", header.state_roots().state_root())?;

        let from = domain_to_address(&msg.from.to_lowercase());
        let to = if msg.to.is_empty() {
            None
        } else {
            Some(domain_to_address(&msg.to.to_lowercase()))
        };
        // The caller's funds are irrelevant for a read-only execution.
        context.view.set_balance(from, U256::MAX);

        let gas_limit = if msg.gas_limit == 0 {
            u64::MAX / 2
        } else {
            msg.gas_limit
        };
        let vm_msg = VmMessage {
            from,
            to,
            nonce: 0,
            value: msg.value,
            gas_limit,
            gas_price: U256::from(msg.gas_price),
            input: msg.input,
            check_nonce: false,
        };
        let block = VmBlockContext {
            coinbase: Default::default(),
            height: header.height,
            timestamp: header.timestamp,
            gas_limit: header.gas_limit,
        };

        let vm = self.vm_handle();
        let canceller = vm.clone();
        let mut view = context.view;
        let handle = tokio::task::spawn_blocking(move || {
            let mut gas_pool = GasPool::new(u64::MAX);
            apply_message(vm.as_ref(), view.as_mut(), &mut gas_pool, &block, &vm_msg)
                .map(|(ret, _gas, _failed)| ret)
        });
        // Cancel the VM once the deadline passes; the execution then
        // returns promptly with a cancellation outcome.
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            canceller.cancel();
        });

        let result = handle
            .await
            .map_err(|e| AppError::Vm(e.to_string()))?;
        timer.abort();
        trace!(runtime = ?started.elapsed(), "executing call finished");
        result
    }
}
