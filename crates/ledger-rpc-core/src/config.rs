//! Configuration for the client stack.
//!
//! Every section deserializes from the PascalCase keys used by node
//! deployment files (`Endpoint`, `RpcUser`, `RpcPassword`, ...). Tuning
//! keys are optional and fall back to the defaults below; connection keys
//! are required and checked by [`ClientConfig::validate`].

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ==============================================================================
// Network Selection
// ==============================================================================

/// Ledger network implementation to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Network {
    #[default]
    #[serde(alias = "multichain", alias = "Multichain")]
    MultiChain,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MultiChain => write!(f, "multichain"),
        }
    }
}

impl std::str::FromStr for Network {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "multichain" => Ok(Self::MultiChain),
            other => Err(CoreError::Config(format!("unknown network `{other}`"))),
        }
    }
}

// ==============================================================================
// Sections
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NodeConfig {
    pub network: Network,
    pub endpoint: String,
    pub rpc_user: String,
    pub rpc_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PoolConfig {
    /// Idle keep-alive connections held per node.
    pub max_connections_per_endpoint: usize,
    /// Admission gate size for concurrent transport creation.
    pub max_concurrent_creations: usize,
    #[serde(rename = "ConnectTimeoutMs", with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(rename = "RequestTimeoutMs", with = "duration_ms")]
    pub request_timeout: Duration,
    #[serde(rename = "IdleTimeoutMs", with = "duration_ms")]
    pub idle_timeout: Duration,
    pub max_retries: u32,
    #[serde(rename = "RetryDelayMs", with = "duration_ms")]
    pub retry_delay: Duration,
    #[serde(rename = "HealthCheckIntervalMs", with = "duration_ms")]
    pub health_check_interval: Duration,
    /// Outbound request rate per pooled connection; unlimited when unset.
    pub requests_per_second: Option<u32>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_endpoint: 32,
            max_concurrent_creations: 4,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
            health_check_interval: Duration::from_secs(60),
            requests_per_second: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BatchConfig {
    #[serde(rename = "EnableBatching")]
    pub enabled: bool,
    pub max_batch_size: usize,
    pub min_batch_size: usize,
    #[serde(rename = "BatchTimeoutMs", with = "duration_ms")]
    pub batch_timeout: Duration,
    pub max_concurrent_batches: usize,
    /// Fan-out cap for the items of a single flushed batch.
    pub dispatch_parallelism: usize,
    /// A queue whose oldest request waited this long is flushed even when
    /// it holds fewer than `min_batch_size` requests.
    #[serde(rename = "MaxQueueDelayMs", with = "duration_ms")]
    pub max_queue_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 50,
            min_batch_size: 5,
            batch_timeout: Duration::from_millis(50),
            max_concurrent_batches: 4,
            dispatch_parallelism: 8,
            max_queue_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SerializationConfig {
    pub buffer_pool_size: usize,
    pub max_cached_types: usize,
    pub enable_compression: bool,
    pub compression_threshold: usize,
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            buffer_pool_size: 16,
            max_cached_types: 64,
            enable_compression: true,
            compression_threshold: 1024,
        }
    }
}

// ==============================================================================
// Client Config
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ClientConfig {
    pub node: NodeConfig,
    pub pool: PoolConfig,
    pub batch: BatchConfig,
    pub serialization: SerializationConfig,
}

impl ClientConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        serde_json::from_str(raw)
            .map_err(|e| CoreError::Config(format!("invalid configuration document: {e}")))
    }

    /// Reject configurations the client cannot start with.
    pub fn validate(&self) -> Result<(), CoreError> {
        let node = &self.node;
        if node.endpoint.trim().is_empty() {
            return Err(CoreError::Config("Endpoint is required".to_owned()));
        }
        parse_endpoint(&node.endpoint)?;
        if node.rpc_user.is_empty() || node.rpc_password.is_empty() {
            return Err(CoreError::Config(
                "RpcUser and RpcPassword are required".to_owned(),
            ));
        }

        if self.pool.max_concurrent_creations == 0 {
            return Err(CoreError::Config(
                "MaxConcurrentCreations must be at least 1".to_owned(),
            ));
        }
        if self.pool.requests_per_second == Some(0) {
            return Err(CoreError::Config(
                "RequestsPerSecond must be at least 1".to_owned(),
            ));
        }

        let batch = &self.batch;
        if batch.max_batch_size == 0 {
            return Err(CoreError::Config(
                "MaxBatchSize must be at least 1".to_owned(),
            ));
        }
        if batch.min_batch_size > batch.max_batch_size {
            return Err(CoreError::Config(format!(
                "MinBatchSize ({}) exceeds MaxBatchSize ({})",
                batch.min_batch_size, batch.max_batch_size
            )));
        }
        if batch.max_concurrent_batches == 0 || batch.dispatch_parallelism == 0 {
            return Err(CoreError::Config(
                "MaxConcurrentBatches and DispatchParallelism must be at least 1".to_owned(),
            ));
        }
        if batch.batch_timeout.is_zero() {
            return Err(CoreError::Config(
                "BatchTimeoutMs must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Accept only `http` and `https` node URLs.
pub fn parse_endpoint(endpoint: &str) -> Result<Url, CoreError> {
    let parsed = Url::parse(endpoint).map_err(|e| {
        CoreError::Config(format!(
            "invalid endpoint `{endpoint}`: expected HTTP(S) URL ({e})"
        ))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(CoreError::Config(format!(
            "unsupported endpoint scheme `{other}`; expected http or https"
        ))),
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
