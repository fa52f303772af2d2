use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::config::{parse_endpoint, Network, NodeConfig};
use crate::error::{CoreError, RpcError};
use crate::pool::ConnectionPool;
use crate::rpc::envelope::{RpcRequest, RpcResponse};
use crate::rpc::ChainRpc;
use crate::serialization::SerializationOptimizer;
use crate::types::{AccountState, BlockId, BlockInfo, NodeStatus, TxStatus};

use super::parsing::{
    optional_u64, parse_account_state, parse_block_info, parse_node_status,
    parse_submitted_txid, parse_tx_status,
};

/// Maximum number of block-hash → height entries cached in memory.
const BLOCK_HEIGHT_CACHE_CAP: usize = 10_000;
/// Longest slice of a non-JSON error body kept in `HttpStatus`.
const ERROR_BODY_PREVIEW: usize = 512;

/// MultiChain JSON-RPC provider.
///
/// Every call gets a fresh envelope id, is serialized through the shared
/// [`SerializationOptimizer`], and runs through the shared
/// [`ConnectionPool`], which owns transport reuse and retries.
pub struct MultiChainProvider {
    pool: Arc<ConnectionPool>,
    serializer: Arc<SerializationOptimizer>,
    endpoint: String,
    user: String,
    password: String,
    next_id: AtomicU64,
    /// Confirmed block heights are immutable, so entries never need
    /// invalidation, only eviction.
    block_height_cache: RwLock<LruCache<String, u64>>,
}

impl MultiChainProvider {
    pub fn new(
        node: &NodeConfig,
        pool: Arc<ConnectionPool>,
        serializer: Arc<SerializationOptimizer>,
    ) -> Result<Self, CoreError> {
        if node.endpoint.trim().is_empty() {
            return Err(CoreError::Config("Endpoint is required".to_owned()));
        }
        if node.rpc_user.is_empty() || node.rpc_password.is_empty() {
            return Err(CoreError::Config(
                "RpcUser and RpcPassword are required".to_owned(),
            ));
        }
        parse_endpoint(&node.endpoint)?;

        let cache_cap = NonZeroUsize::new(BLOCK_HEIGHT_CACHE_CAP).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            pool,
            serializer,
            endpoint: node.endpoint.clone(),
            user: node.rpc_user.clone(),
            password: node.rpc_password.clone(),
            next_id: AtomicU64::new(1),
            block_height_cache: RwLock::new(LruCache::new(cache_cap)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Execute one JSON-RPC call and return its `result`.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            rpc.id = id,
            rpc.method = method,
            rpc.params = params.len(),
            "rpc call"
        );
        let request = RpcRequest {
            method: method.to_owned(),
            params,
            id,
        };
        let body = self.serializer.to_json_vec(&request)?;
        let serializer = &self.serializer;

        let result = self
            .pool
            .execute(&self.endpoint, &self.user, &self.password, |connection| {
                let body = body.clone();
                async move {
                    let response = connection.post(body).send().await?;
                    let status = response.status();
                    let bytes = response.bytes().await?;
                    debug!(rpc.id = id, rpc.method = method, %status, body_len = bytes.len(), "rpc response");
                    trace!(
                        rpc.id = id,
                        rpc.method = method,
                        body = %String::from_utf8_lossy(&bytes),
                        "rpc response body"
                    );
                    decode_reply(serializer, status, &bytes, id)
                }
            })
            .await?;
        Ok(result)
    }

    async fn block_height(&self, block_hash: &str) -> Result<Option<u64>, CoreError> {
        // `LruCache::get` updates recency, so even lookups take the write lock.
        if let Some(height) = self.block_height_cache.write().await.get(block_hash).copied() {
            return Ok(Some(height));
        }

        let raw = self
            .call("getblock", vec![json!(block_hash), json!(1)])
            .await?;
        let height = optional_u64(&raw, "height");
        if let Some(height) = height {
            self.remember_height(block_hash, height).await;
        }
        Ok(height)
    }

    async fn remember_height(&self, block_hash: &str, height: u64) {
        self.block_height_cache
            .write()
            .await
            .put(block_hash.to_owned(), height);
    }
}

/// Turn one HTTP reply into the envelope `result` for request `id`.
///
/// A decodable envelope is authoritative whatever the status code, since
/// nodes answer RPC errors with HTTP 500. A non-success status without
/// one is a transport-level failure and stays retryable.
fn decode_reply(
    serializer: &SerializationOptimizer,
    status: StatusCode,
    body: &[u8],
    id: u64,
) -> Result<Value, RpcError> {
    match serializer.from_json_slice::<RpcResponse>(body) {
        Ok(envelope) if status.is_success() || envelope.error.as_ref().is_some_and(|e| !e.is_null()) => {
            envelope.into_result(id)
        }
        Ok(_) => Err(http_status_error(status, body)),
        Err(_) if !status.is_success() => Err(http_status_error(status, body)),
        Err(err) => Err(RpcError::InvalidResponse(format!(
            "decode JSON-RPC response: {err}"
        ))),
    }
}

fn http_status_error(status: StatusCode, body: &[u8]) -> RpcError {
    let text = String::from_utf8_lossy(body);
    let preview: String = text.chars().take(ERROR_BODY_PREVIEW).collect();
    RpcError::HttpStatus {
        status: status.as_u16(),
        body: preview,
    }
}

#[async_trait]
impl ChainRpc for MultiChainProvider {
    fn network(&self) -> Network {
        Network::MultiChain
    }

    async fn submit_transaction(&self, raw_tx: &str) -> Result<String, CoreError> {
        let raw = self.call("sendrawtransaction", vec![json!(raw_tx)]).await?;
        parse_submitted_txid(raw)
    }

    async fn get_transaction_status(&self, txid: &str) -> Result<TxStatus, CoreError> {
        let raw = self
            .call("getrawtransaction", vec![json!(txid), json!(1)])
            .await?;
        let mut status = parse_tx_status(txid, &raw)?;
        if let Some(block_hash) = status.block_hash.as_deref() {
            status.block_height = self.block_height(block_hash).await?;
        }
        Ok(status)
    }

    async fn get_block(&self, block: &BlockId) -> Result<BlockInfo, CoreError> {
        let id = match block {
            BlockId::Hash(hash) => json!(hash),
            BlockId::Height(height) => json!(height),
        };
        let raw = self.call("getblock", vec![id, json!(1)]).await?;
        let info = parse_block_info(&raw)?;
        self.remember_height(&info.hash, info.height).await;
        Ok(info)
    }

    async fn get_account_state(&self, address: &str) -> Result<AccountState, CoreError> {
        let raw = self
            .call("getaddressbalances", vec![json!(address)])
            .await?;
        parse_account_state(address, &raw)
    }

    async fn get_status(&self) -> Result<NodeStatus, CoreError> {
        let raw = self.call("getinfo", Vec::new()).await?;
        parse_node_status(&raw)
    }

    async fn is_healthy(&self) -> bool {
        match self.get_status().await {
            Ok(_) => true,
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "node health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::PoolConfig;

    use super::*;

    fn serializer() -> SerializationOptimizer {
        SerializationOptimizer::default()
    }

    fn node(endpoint: &str, user: &str, password: &str) -> NodeConfig {
        NodeConfig {
            network: Network::MultiChain,
            endpoint: endpoint.to_owned(),
            rpc_user: user.to_owned(),
            rpc_password: password.to_owned(),
        }
    }

    #[test]
    fn success_envelope_yields_result() {
        let value = decode_reply(
            &serializer(),
            StatusCode::OK,
            br#"{"result":"ab12","error":null,"id":1}"#,
            1,
        )
        .unwrap();
        assert_eq!(value, json!("ab12"));
    }

    #[test]
    fn error_envelope_on_http_500_is_server_error() {
        let err = decode_reply(
            &serializer(),
            StatusCode::INTERNAL_SERVER_ERROR,
            br#"{"result":null,"error":{"code":-5,"message":"No information available about transaction"},"id":4}"#,
            4,
        )
        .unwrap_err();
        assert_eq!(
            err,
            RpcError::ServerError {
                code: -5,
                message: "No information available about transaction".into()
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn bare_non_success_status_is_retryable() {
        let err = decode_reply(
            &serializer(),
            StatusCode::SERVICE_UNAVAILABLE,
            b"Service Unavailable",
            1,
        )
        .unwrap_err();
        assert_eq!(
            err,
            RpcError::HttpStatus {
                status: 503,
                body: "Service Unavailable".into()
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn non_json_success_body_is_invalid_response() {
        let err = decode_reply(&serializer(), StatusCode::OK, b"<html>", 1).unwrap_err();
        assert!(matches!(err, RpcError::InvalidResponse(_)));
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let err = decode_reply(
            &serializer(),
            StatusCode::OK,
            br#"{"result":1,"error":null,"id":99}"#,
            3,
        )
        .unwrap_err();
        assert_eq!(
            err,
            RpcError::IdMismatch {
                expected: 3,
                actual: 99
            }
        );
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let pool = Arc::new(ConnectionPool::new(PoolConfig::default()));
        let serializer = Arc::new(serializer());

        for config in [
            node("", "alice", "secret"),
            node("http://127.0.0.1:6824", "", "secret"),
            node("http://127.0.0.1:6824", "alice", ""),
            node("ftp://127.0.0.1:6824", "alice", "secret"),
        ] {
            let result =
                MultiChainProvider::new(&config, Arc::clone(&pool), Arc::clone(&serializer));
            assert!(matches!(result, Err(CoreError::Config(_))));
        }
    }

    #[tokio::test]
    async fn ids_increase_per_call() {
        let pool = Arc::new(ConnectionPool::new(PoolConfig {
            max_retries: 0,
            connect_timeout: std::time::Duration::from_millis(50),
            ..PoolConfig::default()
        }));
        // Port 9 (discard) refuses connections on test hosts.
        let provider = MultiChainProvider::new(
            &node("http://127.0.0.1:9", "alice", "secret"),
            pool,
            Arc::new(serializer()),
        )
        .unwrap();

        let _ = provider.call("getinfo", Vec::new()).await;
        let _ = provider.call("getinfo", Vec::new()).await;
        assert_eq!(provider.next_id.load(Ordering::Relaxed), 3);
    }
}
