//! Composition root: one [`ChainClient`] wires the pool, serializer,
//! provider and batch processor from a single [`ClientConfig`].

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::batch::{BatchOutput, BatchProcessor, BatchRequest, BatchStatistics};
use crate::config::{ClientConfig, Network};
use crate::error::CoreError;
use crate::pool::{ConnectionPool, PoolStatistics};
use crate::rpc::{self, ChainRpc};
use crate::serialization::{SerializationOptimizer, SerializationStatistics};
use crate::types::{AccountState, BlockId, BlockInfo, NodeStatus, TxStatus};

/// Priority used by the convenience operations.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Combined snapshot of every component's counters.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatistics {
    pub network: Network,
    pub pool: PoolStatistics,
    pub batch: BatchStatistics,
    pub serialization: SerializationStatistics,
}

pub struct ChainClient {
    network: Network,
    pool: Arc<ConnectionPool>,
    serializer: Arc<SerializationOptimizer>,
    rpc: Arc<dyn ChainRpc>,
    batcher: Arc<BatchProcessor>,
    health_monitor: JoinHandle<()>,
}

impl ChainClient {
    /// Validate `config`, build the stack and start its background tasks.
    /// Must be called from within a tokio runtime.
    pub fn connect(config: ClientConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let pool = Arc::new(ConnectionPool::new(config.pool.clone()));
        let serializer = Arc::new(SerializationOptimizer::new(config.serialization.clone()));
        let rpc = rpc::connect(&config.node, Arc::clone(&pool), Arc::clone(&serializer))?;
        info!(
            network = %config.node.network,
            endpoint = %config.node.endpoint,
            batching = config.batch.enabled,
            "ledger client ready"
        );
        Ok(Self::assemble(config, pool, serializer, rpc))
    }

    fn assemble(
        config: ClientConfig,
        pool: Arc<ConnectionPool>,
        serializer: Arc<SerializationOptimizer>,
        rpc: Arc<dyn ChainRpc>,
    ) -> Self {
        let health_monitor = pool.spawn_health_monitor();
        let batcher = BatchProcessor::start(Arc::clone(&rpc), config.batch);
        Self {
            network: rpc.network(),
            pool,
            serializer,
            rpc,
            batcher,
            health_monitor,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// The provider, for calls that should skip the batch layer.
    pub fn provider(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    pub fn serializer(&self) -> &Arc<SerializationOptimizer> {
        &self.serializer
    }

    /// Queue an arbitrary request with an explicit priority.
    pub async fn submit(
        &self,
        request: BatchRequest,
        priority: i32,
    ) -> Result<BatchOutput, CoreError> {
        self.batcher.submit(request, priority).await
    }

    pub async fn submit_transaction(&self, raw_tx: &str) -> Result<String, CoreError> {
        self.batcher
            .submit_transaction(raw_tx, DEFAULT_PRIORITY)
            .await
    }

    pub async fn get_transaction_status(&self, txid: &str) -> Result<TxStatus, CoreError> {
        self.batcher
            .get_transaction_status(txid, DEFAULT_PRIORITY)
            .await
    }

    pub async fn get_account_state(&self, address: &str) -> Result<AccountState, CoreError> {
        self.batcher
            .get_account_state(address, DEFAULT_PRIORITY)
            .await
    }

    pub async fn get_block(&self, block: &BlockId) -> Result<BlockInfo, CoreError> {
        self.rpc.get_block(block).await
    }

    pub async fn get_status(&self) -> Result<NodeStatus, CoreError> {
        self.rpc.get_status().await
    }

    pub async fn is_healthy(&self) -> bool {
        self.rpc.is_healthy().await
    }

    pub fn statistics(&self) -> ClientStatistics {
        ClientStatistics {
            network: self.network,
            pool: self.pool.statistics(),
            batch: self.batcher.statistics(),
            serialization: self.serializer.statistics(),
        }
    }

    /// Flush queued requests, stop background tasks and close every
    /// pooled transport.
    pub async fn shutdown(&self) {
        self.batcher.shutdown().await;
        self.health_monitor.abort();
        self.pool.shutdown().await;
    }
}
