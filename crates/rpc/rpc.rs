//! JSON-RPC surface of the state application.
//!
//! One HTTP endpoint serves two namespaces: `apps` (state queries and
//! read-only calls, version 1.0) and `txpool` (pool inspection, version
//! 1.0). Requests follow JSON-RPC 2.0, singly or batched.

pub mod apps;
pub mod txpool;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, http::StatusCode, routing::post};
use axum::extract::State;
use chain5j_app::Application;
use chain5j_app::mempool::TxPool;
use chain5j_storage::Store;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::apps::{
    AccountInfoRequest, CallRequest, DomainInfoRequest, GetBalanceRequest,
    GetTransactionCountRequest, PartnerRequest,
};
use crate::txpool::TxPoolStatusRequest;
use crate::utils::{RpcErr, RpcNamespace, RpcRequest, RpcRequestId, rpc_response};

/// Shared dependencies of every RPC handler; cloning is cheap.
#[derive(Clone)]
pub struct RpcApiContext {
    pub app: Arc<Application>,
    pub pool: Arc<TxPool>,
    pub storage: Store,
}

/// A single request or a JSON-RPC 2.0 batch.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum RpcRequestWrapper {
    Single(RpcRequest),
    Multiple(Vec<RpcRequest>),
}

/// A parsed, executable RPC method.
pub trait RpcHandler: Sized {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr>;

    async fn call(req: &RpcRequest, context: RpcApiContext) -> Result<Value, RpcErr> {
        let request = Self::parse(&req.params)?;
        request.handle(context).await
    }

    async fn handle(&self, context: RpcApiContext) -> Result<Value, RpcErr>;
}

/// Serves the JSON-RPC API until interrupted.
pub async fn start_api(http_addr: SocketAddr, context: RpcApiContext) -> Result<(), RpcErr> {
    let cors = CorsLayer::permissive();
    let router = Router::new()
        .route("/", post(handle_http_request))
        .layer(cors)
        .with_state(context);
    let listener = TcpListener::bind(http_addr)
        .await
        .map_err(|error| RpcErr::Internal(error.to_string()))?;
    info!("Starting HTTP server at {http_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| RpcErr::Internal(error.to_string()))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn handle_http_request(
    State(context): State<RpcApiContext>,
    body: String,
) -> Result<Json<Value>, StatusCode> {
    let response = match serde_json::from_str::<RpcRequestWrapper>(&body) {
        Ok(RpcRequestWrapper::Single(request)) => {
            let result = map_http_requests(&request, context).await;
            rpc_response(request.id, result).map_err(|_| StatusCode::BAD_REQUEST)?
        }
        Ok(RpcRequestWrapper::Multiple(requests)) => {
            let mut responses = Vec::new();
            for request in requests {
                let result = map_http_requests(&request, context.clone()).await;
                responses
                    .push(rpc_response(request.id, result).map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            serde_json::to_value(responses).map_err(|_| StatusCode::BAD_REQUEST)?
        }
        Err(_) => rpc_response(
            RpcRequestId::String("".to_string()),
            Err(RpcErr::BadParams("Invalid request body".to_string())),
        )
        .map_err(|_| StatusCode::BAD_REQUEST)?,
    };
    Ok(Json(response))
}

/// Routes a request to its namespace handler.
pub async fn map_http_requests(
    req: &RpcRequest,
    context: RpcApiContext,
) -> Result<Value, RpcErr> {
    match req.namespace()? {
        RpcNamespace::Apps => map_apps_requests(req, context).await,
        RpcNamespace::TxPool => map_txpool_requests(req, context).await,
    }
}

/// `apps` namespace, version 1.0.
pub async fn map_apps_requests(
    req: &RpcRequest,
    context: RpcApiContext,
) -> Result<Value, RpcErr> {
    match req.method.as_str() {
        "apps_getBalance" => GetBalanceRequest::call(req, context).await,
        "apps_getTransactionCount" => GetTransactionCountRequest::call(req, context).await,
        "apps_call" => CallRequest::call(req, context).await,
        "apps_accountInfo" => AccountInfoRequest::call(req, context).await,
        "apps_partner" => PartnerRequest::call(req, context).await,
        "apps_domainInfo" => DomainInfoRequest::call(req, context).await,
        other => Err(RpcErr::MethodNotFound(other.to_string())),
    }
}

/// `txpool` namespace, version 1.0.
pub async fn map_txpool_requests(
    req: &RpcRequest,
    context: RpcApiContext,
) -> Result<Value, RpcErr> {
    match req.method.as_str() {
        "txpool_status" => TxPoolStatusRequest::call(req, context).await,
        other => Err(RpcErr::MethodNotFound(other.to_string())),
    }
}
