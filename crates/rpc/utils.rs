//! JSON-RPC 2.0 envelope types and error codes.

use chain5j_app::error::{AppError, MempoolError};
use chain5j_storage::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type for JSON-RPC method failures; each variant maps to a
/// JSON-RPC error code when serialized.
#[derive(Debug, thiserror::Error)]
pub enum RpcErr {
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    BadParams(String),
    #[error("Missing parameter: {0}")]
    MissingParam(String),
    #[error("Internal Error: {0}")]
    Internal(String),
    #[error("Vm execution error: {0}")]
    Vm(String),
    #[error("{0}")]
    Rejected(String),
}

impl From<RpcErr> for RpcErrorMetadata {
    fn from(value: RpcErr) -> Self {
        match value {
            RpcErr::MethodNotFound(method) => RpcErrorMetadata {
                code: -32601,
                data: None,
                message: format!("Method not found: {method}"),
            },
            RpcErr::BadParams(context) => RpcErrorMetadata {
                code: -32602,
                data: None,
                message: format!("Invalid params: {context}"),
            },
            RpcErr::MissingParam(name) => RpcErrorMetadata {
                code: -32000,
                data: None,
                message: format!("Expected parameter: {name} is missing"),
            },
            RpcErr::Internal(context) => RpcErrorMetadata {
                code: -32603,
                data: None,
                message: format!("Internal Error: {context}"),
            },
            RpcErr::Vm(context) => RpcErrorMetadata {
                code: -32015,
                data: None,
                message: format!("Vm execution error: {context}"),
            },
            RpcErr::Rejected(context) => RpcErrorMetadata {
                code: -32000,
                data: None,
                message: context,
            },
        }
    }
}

impl From<serde_json::Error> for RpcErr {
    fn from(error: serde_json::Error) -> Self {
        Self::BadParams(error.to_string())
    }
}

impl From<AppError> for RpcErr {
    fn from(error: AppError) -> Self {
        match error {
            AppError::Store(inner) => Self::Internal(inner.to_string()),
            AppError::Vm(inner) => Self::Vm(inner),
            other => Self::Rejected(other.to_string()),
        }
    }
}

impl From<MempoolError> for RpcErr {
    fn from(error: MempoolError) -> Self {
        match error {
            MempoolError::App(inner) => inner.into(),
            MempoolError::LockPoisoned(inner) => Self::Internal(inner),
            other => Self::Rejected(other.to_string()),
        }
    }
}

impl From<StoreError> for RpcErr {
    fn from(error: StoreError) -> Self {
        Self::Internal(error.to_string())
    }
}

/// Method namespaces served by this node.
pub enum RpcNamespace {
    /// State-application queries (`apps_*`).
    Apps,
    /// Transaction-pool inspection (`txpool_*`).
    TxPool,
}

pub fn resolve_namespace(method: &str) -> Result<RpcNamespace, RpcErr> {
    match method.split('_').next() {
        Some("apps") => Ok(RpcNamespace::Apps),
        Some("txpool") => Ok(RpcNamespace::TxPool),
        _ => Err(RpcErr::MethodNotFound(method.to_string())),
    }
}

/// Request IDs may be numbers or strings; the response echoes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcRequestId {
    Number(u64),
    String(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Vec<Value>>,
}

impl RpcRequest {
    pub fn namespace(&self) -> Result<RpcNamespace, RpcErr> {
        resolve_namespace(&self.method)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcErrorMetadata {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcSuccessResponse {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub result: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcErrorResponse {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub error: RpcErrorMetadata,
}

/// Builds the wire response for a handler result.
pub fn rpc_response(
    id: RpcRequestId,
    result: Result<Value, RpcErr>,
) -> Result<Value, serde_json::Error> {
    match result {
        Ok(result) => serde_json::to_value(RpcSuccessResponse {
            id,
            jsonrpc: "2.0".to_string(),
            result,
        }),
        Err(error) => serde_json::to_value(RpcErrorResponse {
            id,
            jsonrpc: "2.0".to_string(),
            error: error.into(),
        }),
    }
}
