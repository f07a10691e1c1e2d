//! Handlers for the `apps` namespace.

use chain5j_app::api::{BlockRef, CallMessage};
use serde_json::Value;

use crate::utils::RpcErr;
use crate::{RpcApiContext, RpcHandler};

fn param<T: for<'de> serde::Deserialize<'de>>(
    params: &Option<Vec<Value>>,
    index: usize,
    name: &str,
) -> Result<T, RpcErr> {
    let value = params
        .as_ref()
        .and_then(|params| params.get(index))
        .ok_or_else(|| RpcErr::MissingParam(name.to_string()))?;
    serde_json::from_value(value.clone()).map_err(|e| RpcErr::BadParams(e.to_string()))
}

fn optional_block_ref(params: &Option<Vec<Value>>, index: usize) -> Result<BlockRef, RpcErr> {
    match params.as_ref().and_then(|params| params.get(index)) {
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|e| RpcErr::BadParams(e.to_string()))
        }
        None => Ok(BlockRef::Latest),
    }
}

pub struct GetBalanceRequest {
    account: String,
    block_ref: BlockRef,
}

impl RpcHandler for GetBalanceRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(GetBalanceRequest {
            account: param(params, 0, "account")?,
            block_ref: optional_block_ref(params, 1)?,
        })
    }

    async fn handle(&self, context: RpcApiContext) -> Result<Value, RpcErr> {
        let balance = context.app.get_balance(&self.account, &self.block_ref)?;
        Ok(serde_json::to_value(balance)?)
    }
}

pub struct GetTransactionCountRequest {
    account: String,
    block_ref: BlockRef,
}

impl RpcHandler for GetTransactionCountRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(GetTransactionCountRequest {
            account: param(params, 0, "account")?,
            block_ref: optional_block_ref(params, 1)?,
        })
    }

    async fn handle(&self, context: RpcApiContext) -> Result<Value, RpcErr> {
        let nonce = context
            .app
            .get_transaction_count(&self.account, &self.block_ref)?;
        Ok(serde_json::to_value(nonce)?)
    }
}

pub struct CallRequest {
    message: CallMessage,
    block_ref: BlockRef,
}

impl RpcHandler for CallRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(CallRequest {
            message: param(params, 0, "message")?,
            block_ref: optional_block_ref(params, 1)?,
        })
    }

    async fn handle(&self, context: RpcApiContext) -> Result<Value, RpcErr> {
        let output = context
            .app
            .call(self.message.clone(), &self.block_ref)
            .await?;
        Ok(Value::String(format!("0x{}", hex::encode(&output))))
    }
}

pub struct AccountInfoRequest {
    account: String,
    block_ref: BlockRef,
}

impl RpcHandler for AccountInfoRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(AccountInfoRequest {
            account: param(params, 0, "account")?,
            block_ref: optional_block_ref(params, 1)?,
        })
    }

    async fn handle(&self, context: RpcApiContext) -> Result<Value, RpcErr> {
        let account = context.app.account_info(&self.account, &self.block_ref)?;
        Ok(serde_json::to_value(account)?)
    }
}

pub struct PartnerRequest {
    account: String,
    block_ref: BlockRef,
}

impl RpcHandler for PartnerRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(PartnerRequest {
            account: param(params, 0, "account")?,
            block_ref: optional_block_ref(params, 1)?,
        })
    }

    async fn handle(&self, context: RpcApiContext) -> Result<Value, RpcErr> {
        let partner = context.app.partner(&self.account, &self.block_ref)?;
        Ok(serde_json::to_value(partner)?)
    }
}

pub struct DomainInfoRequest {
    domain: String,
    block_ref: BlockRef,
}

impl RpcHandler for DomainInfoRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(DomainInfoRequest {
            domain: param(params, 0, "domain")?,
            block_ref: optional_block_ref(params, 1)?,
        })
    }

    async fn handle(&self, context: RpcApiContext) -> Result<Value, RpcErr> {
        let domain = context.app.domain_info(&self.domain, &self.block_ref)?;
        Ok(serde_json::to_value(domain)?)
    }
}
