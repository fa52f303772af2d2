//! Domain types returned by the provider facade.
//!
//! These are network-neutral: every ledger implementation maps its own
//! RPC results onto them, so callers never see a node's raw JSON shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ==============================================================================
// Transactions
// ==============================================================================

/// Coarse settlement state derived from the confirmation count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Pending,
    Confirmed,
}

impl TxState {
    pub fn from_confirmations(confirmations: u64) -> Self {
        if confirmations > 0 {
            Self::Confirmed
        } else {
            Self::Pending
        }
    }
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxStatus {
    pub txid: String,
    pub state: TxState,
    pub confirmations: u64,
    pub block_hash: Option<String>,
    /// Only resolved when the node reported a containing block.
    pub block_height: Option<u64>,
    pub block_time: Option<u64>,
}

// ==============================================================================
// Blocks
// ==============================================================================

/// A block is addressed either by hash or by height.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockId {
    Hash(String),
    Height(u64),
}

impl std::str::FromStr for BlockId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<u64>() {
            Ok(height) => Self::Height(height),
            Err(_) => Self::Hash(s.to_owned()),
        })
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hash(hash) => write!(f, "{hash}"),
            Self::Height(height) => write!(f, "{height}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: String,
    pub height: u64,
    pub time: u64,
    pub confirmations: u64,
    pub previous_hash: Option<String>,
    pub miner: Option<String>,
    pub tx_count: usize,
}

// ==============================================================================
// Accounts
// ==============================================================================

/// Balances held by one address.
///
/// `balance` is the native currency; every named asset the node reports
/// is kept in `assets`, keyed by asset name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub address: String,
    pub balance: f64,
    pub assets: BTreeMap<String, f64>,
}

// ==============================================================================
// Node
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub chain_name: String,
    pub version: String,
    pub protocol_version: u64,
    pub blocks: u64,
    pub connections: u64,
    pub node_address: Option<String>,
}
