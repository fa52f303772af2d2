use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Network;
use crate::error::{CoreError, RpcError};
use crate::types::{AccountState, BlockId, BlockInfo, NodeStatus, TxStatus};

use super::ChainRpc;

/// Error code the mock reports for unknown or deliberately failing keys.
pub const MOCK_NOT_FOUND: i64 = -5;

/// A mock ledger backend for testing. Returns canned data populated via
/// the builder pattern and records every call in arrival order.
pub struct MockRpc {
    transactions: HashMap<String, TxStatus>,
    accounts: HashMap<String, AccountState>,
    blocks: Vec<BlockInfo>,
    status: NodeStatus,
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(&'static str, String)>>,
}

impl MockRpc {
    pub fn builder() -> MockRpcBuilder {
        MockRpcBuilder {
            transactions: HashMap::new(),
            accounts: HashMap::new(),
            blocks: Vec::new(),
            status: NodeStatus {
                chain_name: "chain1".into(),
                version: "2.3.3".into(),
                protocol_version: 20013,
                blocks: 100,
                connections: 1,
                node_address: None,
            },
            failing: HashSet::new(),
            delay: None,
        }
    }

    /// Number of calls made for `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.lock_calls().iter().filter(|(m, _)| *m == method).count()
    }

    /// Number of calls made for `method` with this key.
    pub fn calls_for(&self, method: &str, key: &str) -> usize {
        self.lock_calls()
            .iter()
            .filter(|(m, k)| *m == method && k == key)
            .count()
    }

    /// Keys in the order the calls reached the mock.
    pub fn dispatch_order(&self) -> Vec<String> {
        self.lock_calls().iter().map(|(_, key)| key.clone()).collect()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<(&'static str, String)>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn record(&self, method: &'static str, key: &str) -> Result<(), CoreError> {
        self.lock_calls().push((method, key.to_owned()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(key) {
            return Err(not_found(key));
        }
        Ok(())
    }
}

fn not_found(key: &str) -> CoreError {
    CoreError::Rpc(RpcError::ServerError {
        code: MOCK_NOT_FOUND,
        message: format!("{key} not found"),
    })
}

pub struct MockRpcBuilder {
    transactions: HashMap<String, TxStatus>,
    accounts: HashMap<String, AccountState>,
    blocks: Vec<BlockInfo>,
    status: NodeStatus,
    failing: HashSet<String>,
    delay: Option<Duration>,
}

impl MockRpcBuilder {
    pub fn with_tx(mut self, status: TxStatus) -> Self {
        self.transactions.insert(status.txid.clone(), status);
        self
    }

    pub fn with_account(mut self, state: AccountState) -> Self {
        self.accounts.insert(state.address.clone(), state);
        self
    }

    pub fn with_block(mut self, block: BlockInfo) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// Make every call keyed by `key` (txid, address or raw tx) fail.
    pub fn failing(mut self, key: &str) -> Self {
        self.failing.insert(key.to_owned());
        self
    }

    /// Hold every call for `delay` after recording it.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn build(self) -> MockRpc {
        MockRpc {
            transactions: self.transactions,
            accounts: self.accounts,
            blocks: self.blocks,
            status: self.status,
            failing: self.failing,
            delay: self.delay,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    fn network(&self) -> Network {
        Network::MultiChain
    }

    async fn submit_transaction(&self, raw_tx: &str) -> Result<String, CoreError> {
        self.record("sendrawtransaction", raw_tx).await?;
        Ok(format!("txid-{raw_tx}"))
    }

    async fn get_transaction_status(&self, txid: &str) -> Result<TxStatus, CoreError> {
        self.record("getrawtransaction", txid).await?;
        self.transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| not_found(txid))
    }

    async fn get_block(&self, block: &BlockId) -> Result<BlockInfo, CoreError> {
        let key = block.to_string();
        self.record("getblock", &key).await?;
        self.blocks
            .iter()
            .find(|b| match block {
                BlockId::Hash(hash) => &b.hash == hash,
                BlockId::Height(height) => b.height == *height,
            })
            .cloned()
            .ok_or_else(|| not_found(&key))
    }

    async fn get_account_state(&self, address: &str) -> Result<AccountState, CoreError> {
        self.record("getaddressbalances", address).await?;
        Ok(self
            .accounts
            .get(address)
            .cloned()
            .unwrap_or_else(|| AccountState {
                address: address.to_owned(),
                balance: 0.0,
                assets: Default::default(),
            }))
    }

    async fn get_status(&self) -> Result<NodeStatus, CoreError> {
        self.record("getinfo", "").await?;
        Ok(self.status.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[tokio::test]
    async fn with_status_overrides_defaults() {
        let rpc = MockRpc::builder()
            .with_status(node_status("prod-chain", 800_000))
            .build();
        let status = rpc.get_status().await.unwrap();
        assert_eq!(status.chain_name, "prod-chain");
        assert_eq!(status.blocks, 800_000);
        assert!(rpc.is_healthy().await);
    }

    #[tokio::test]
    async fn records_calls_in_arrival_order() {
        let rpc = MockRpc::builder()
            .with_tx(confirmed_tx("t1", 3))
            .with_tx(pending_tx("t2"))
            .build();

        rpc.get_transaction_status("t2").await.unwrap();
        rpc.get_transaction_status("t1").await.unwrap();
        rpc.get_account_state("A1").await.unwrap();

        assert_eq!(rpc.call_count("getrawtransaction"), 2);
        assert_eq!(rpc.calls_for("getaddressbalances", "A1"), 1);
        assert_eq!(rpc.dispatch_order(), vec!["t2", "t1", "A1"]);
    }

    #[tokio::test]
    async fn failing_keys_return_server_errors() {
        let rpc = MockRpc::builder().failing("bad").build();
        let err = rpc.submit_transaction("bad").await.unwrap_err();
        assert_eq!(err.server_message(), Some("bad not found"));
        assert_eq!(rpc.submit_transaction("ok").await.unwrap(), "txid-ok");
    }

    #[tokio::test]
    async fn blocks_resolve_by_hash_or_height() {
        let rpc = MockRpc::builder().with_block(block_info("00aa", 7)).build();
        assert_eq!(rpc.get_block(&BlockId::Height(7)).await.unwrap().hash, "00aa");
        assert_eq!(
            rpc.get_block(&BlockId::Hash("00aa".into())).await.unwrap().height,
            7
        );
        assert!(rpc.get_block(&BlockId::Height(8)).await.is_err());
    }
}
