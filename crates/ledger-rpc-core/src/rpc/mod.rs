//! Ledger RPC abstraction layer.
//!
//! Defines the [`ChainRpc`] capability trait and provides the MultiChain
//! JSON-RPC implementation ([`MultiChainProvider`]) plus a test mock
//! (`mock::MockRpc`).

pub mod envelope;
#[cfg(test)]
pub mod mock;
mod multichain;

pub use multichain::MultiChainProvider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Network, NodeConfig};
use crate::error::CoreError;
use crate::pool::ConnectionPool;
use crate::serialization::SerializationOptimizer;
use crate::types::{AccountState, BlockId, BlockInfo, NodeStatus, TxStatus};

/// Operations every supported ledger network exposes.
///
/// Implementations are expected to handle authentication, connection
/// management, and response decoding internally.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    fn network(&self) -> Network;

    /// Broadcast a signed raw transaction (hex) and return its id.
    async fn submit_transaction(&self, raw_tx: &str) -> Result<String, CoreError>;

    async fn get_transaction_status(&self, txid: &str) -> Result<TxStatus, CoreError>;

    async fn get_block(&self, block: &BlockId) -> Result<BlockInfo, CoreError>;

    async fn get_account_state(&self, address: &str) -> Result<AccountState, CoreError>;

    async fn get_status(&self) -> Result<NodeStatus, CoreError>;

    /// `true` when the node answers a status query.
    async fn is_healthy(&self) -> bool {
        self.get_status().await.is_ok()
    }
}

/// Build the provider for the network named in `node`.
pub fn connect(
    node: &NodeConfig,
    pool: Arc<ConnectionPool>,
    serializer: Arc<SerializationOptimizer>,
) -> Result<Arc<dyn ChainRpc>, CoreError> {
    match node.network {
        Network::MultiChain => Ok(Arc::new(MultiChainProvider::new(node, pool, serializer)?)),
    }
}
