use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::config::{parse_endpoint, PoolConfig};
use crate::error::{CoreError, RpcError};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

// ==============================================================================
// Pool Key
// ==============================================================================

/// Identity of one pooled transport: the node endpoint plus the credential
/// pair used against it. The password only contributes a fingerprint so
/// keys can be logged safely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    endpoint: String,
    user: String,
    secret_fingerprint: u64,
}

impl PoolKey {
    pub fn new(endpoint: &str, user: &str, password: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        password.hash(&mut hasher);
        Self {
            endpoint: endpoint.to_owned(),
            user: user.to_owned(),
            secret_fingerprint: hasher.finish(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user, self.endpoint)
    }
}

// ==============================================================================
// Pooled Connection
// ==============================================================================

/// A long-lived HTTP transport bound to one node and one credential pair.
///
/// The underlying `reqwest::Client` keeps its own keep-alive pool and is
/// safe to share between tasks; `in_flight` caps how many requests use it
/// at the same time.
pub struct PooledConnection {
    key: PoolKey,
    client: reqwest::Client,
    user: String,
    password: String,
    in_flight: Semaphore,
    limiter: Option<DirectRateLimiter>,
    created_at: Instant,
    last_used_ms: AtomicU64,
}

impl PooledConnection {
    pub(super) fn open(
        key: PoolKey,
        user: &str,
        password: &str,
        config: &PoolConfig,
    ) -> Result<Self, CoreError> {
        parse_endpoint(key.endpoint())?;

        // Cookies and proxies are left off: the only peer is a single
        // trusted node and both add per-request work.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.max_connections_per_endpoint)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .cookie_store(false)
            .no_proxy()
            .build()
            .map_err(|e| RpcError::Transport(format!("build HTTP transport: {e}")))?;

        let limiter = match config.requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::Config("RequestsPerSecond must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            key,
            client,
            user: user.to_owned(),
            password: password.to_owned(),
            in_flight: Semaphore::new(config.max_connections_per_endpoint.max(1)),
            limiter,
            created_at: Instant::now(),
            last_used_ms: AtomicU64::new(0),
        })
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn endpoint(&self) -> &str {
        self.key.endpoint()
    }

    /// Start an authenticated JSON POST against the node endpoint.
    pub fn post(&self, body: Vec<u8>) -> reqwest::RequestBuilder {
        self.client
            .post(self.key.endpoint())
            .header(header::CONTENT_TYPE, "application/json")
            .basic_auth(&self.user, Some(&self.password))
            .body(body)
    }

    pub(super) async fn admit(&self) -> Result<SemaphorePermit<'_>, RpcError> {
        let permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| RpcError::Transport("connection closed".to_owned()))?;
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        self.touch();
        Ok(permit)
    }

    pub(super) fn close(&self) {
        self.in_flight.close();
    }

    fn touch(&self) {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.last_used_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Time since the connection last admitted a request (or was opened).
    pub fn idle_for(&self) -> Duration {
        let last_used = Duration::from_millis(self.last_used_ms.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last_used)
    }

    /// Requests currently holding an in-flight slot.
    pub(super) fn busy(&self, capacity: usize) -> bool {
        self.in_flight.available_permits() < capacity.max(1)
    }
}
