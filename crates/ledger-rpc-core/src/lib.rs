pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod pool;
pub mod rpc;
pub mod serialization;
#[cfg(test)]
pub(crate) mod test_util;
pub mod types;

pub use client::{ChainClient, ClientStatistics};
pub use config::ClientConfig;
pub use error::{CoreError, RpcError};
pub use rpc::ChainRpc;
