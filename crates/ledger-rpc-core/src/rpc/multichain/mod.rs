//! JSON-RPC provider for MultiChain nodes.
//!
//! Implements [`ChainRpc`](crate::rpc::ChainRpc) over the shared connection
//! pool and serialization pipeline, with an LRU block-height cache for
//! transaction status lookups.

mod parsing;
mod provider;

pub use provider::MultiChainProvider;
