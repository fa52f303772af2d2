use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ledger_rpc_core::types::BlockId;

/// Pooled, batched JSON-RPC client for permissioned ledger nodes.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// JSON configuration file (`Node`, `Pool`, `Batch`, `Serialization`
    /// sections). Flags below override values from the file.
    #[arg(long, env = "LEDGER_RPC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Node JSON-RPC URL.
    #[arg(long, env = "LEDGER_RPC_ENDPOINT")]
    pub endpoint: Option<String>,

    /// RPC username.
    #[arg(long, env = "LEDGER_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC password.
    #[arg(long, env = "LEDGER_RPC_PASSWORD", hide_env_values = true)]
    pub rpc_password: Option<String>,

    /// Retries per call after a transport failure.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Cap outbound requests per second.
    #[arg(long)]
    pub requests_per_second: Option<u32>,

    /// Send every request straight to the node instead of batching.
    #[arg(long)]
    pub no_batching: bool,

    /// Print a JSON statistics snapshot after the command.
    #[arg(long)]
    pub print_stats: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Show node status (`getinfo`).
    Status,
    /// Exit non-zero unless the node answers a status query.
    Health,
    /// Broadcast signed raw transactions (hex).
    Submit {
        #[arg(required = true)]
        raw_tx: Vec<String>,
    },
    /// Poll confirmation state of transactions.
    TxStatus {
        #[arg(required = true)]
        txids: Vec<String>,
    },
    /// Look up a block by hash or height.
    Block { id: BlockId },
    /// Query native and asset balances of addresses.
    Balance {
        #[arg(required = true)]
        addresses: Vec<String>,
    },
    /// Probe the node and print the client statistics.
    Stats,
}
