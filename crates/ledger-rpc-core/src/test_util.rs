//! Shared test helpers for `ledger-rpc-core` unit tests.
//!
//! Builder functions for the domain types so tests across modules share a
//! single source of truth for dummy data.

use std::collections::BTreeMap;

use crate::types::{AccountState, BlockInfo, NodeStatus, TxState, TxStatus};

// ==============================================================================
// Transactions
// ==============================================================================

pub fn pending_tx(txid: &str) -> TxStatus {
    TxStatus {
        txid: txid.to_owned(),
        state: TxState::Pending,
        confirmations: 0,
        block_hash: None,
        block_height: None,
        block_time: None,
    }
}

pub fn confirmed_tx(txid: &str, confirmations: u64) -> TxStatus {
    TxStatus {
        txid: txid.to_owned(),
        state: TxState::Confirmed,
        confirmations,
        block_hash: Some(format!("block-of-{txid}")),
        block_height: Some(100),
        block_time: Some(1_700_000_000),
    }
}

// ==============================================================================
// Accounts, Blocks, Node
// ==============================================================================

pub fn account(address: &str, balance: f64, assets: &[(&str, f64)]) -> AccountState {
    AccountState {
        address: address.to_owned(),
        balance,
        assets: assets
            .iter()
            .map(|(name, qty)| ((*name).to_owned(), *qty))
            .collect::<BTreeMap<_, _>>(),
    }
}

pub fn block_info(hash: &str, height: u64) -> BlockInfo {
    BlockInfo {
        hash: hash.to_owned(),
        height,
        time: 1_700_000_000,
        confirmations: 1,
        previous_hash: None,
        miner: None,
        tx_count: 1,
    }
}

pub fn node_status(chain_name: &str, blocks: u64) -> NodeStatus {
    NodeStatus {
        chain_name: chain_name.to_owned(),
        version: "2.3.3".to_owned(),
        protocol_version: 20013,
        blocks,
        connections: 2,
        node_address: None,
    }
}
