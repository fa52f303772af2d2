//! Connection pool: one reusable HTTP transport per (endpoint, credential)
//! pair, with bounded creation, linear-backoff retries and health stats.

mod connection;
mod stats;

pub use connection::{PoolKey, PooledConnection};
pub use stats::PoolStatistics;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Instant;

use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{CoreError, RpcError};

use stats::PoolCounters;

/// Below this success rate the health sweep reports the pool as degraded.
const HEALTHY_SUCCESS_RATE: f64 = 0.95;
/// Requests that must have finished before the success rate is trusted.
const MIN_HEALTH_SAMPLE: u64 = 100;

pub struct ConnectionPool {
    config: PoolConfig,
    connections: RwLock<HashMap<PoolKey, Arc<PooledConnection>>>,
    creation_gate: Semaphore,
    counters: PoolCounters,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        let creation_gate = Semaphore::new(config.max_concurrent_creations.max(1));
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            creation_gate,
            counters: PoolCounters::default(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Return the transport for `(endpoint, user, password)`, opening it on
    /// first use.
    ///
    /// Concurrent callers for the same key always receive the same
    /// instance. Up to `max_concurrent_creations` transports are built at
    /// once, outside the map lock; the first one inserted for a key wins and
    /// any other build for that key is discarded.
    pub async fn acquire(
        &self,
        endpoint: &str,
        user: &str,
        password: &str,
    ) -> Result<Arc<PooledConnection>, CoreError> {
        let key = PoolKey::new(endpoint, user, password);
        if let Some(existing) = self.connections.read().await.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let _permit = self
            .creation_gate
            .acquire()
            .await
            .map_err(|_| CoreError::Rpc(RpcError::Transport("pool is shut down".to_owned())))?;

        if let Some(existing) = self.connections.read().await.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let built = Arc::new(PooledConnection::open(
            key.clone(),
            user,
            password,
            &self.config,
        )?);

        let mut connections = self.connections.write().await;
        let connection = Arc::clone(
            connections
                .entry(key.clone())
                .or_insert_with(|| Arc::clone(&built)),
        );
        drop(connections);

        if Arc::ptr_eq(&connection, &built) {
            self.counters.connection_created();
            info!(pool.key = %key, "opened pooled connection");
        } else {
            debug!(pool.key = %key, "discarded duplicate transport build");
        }
        Ok(connection)
    }

    /// Run `request` against the pooled transport for the key, retrying
    /// transport failures and non-success statuses with a linearly growing
    /// delay (`retry_delay * attempt`).
    ///
    /// Node-reported errors are returned immediately. Whatever the last
    /// attempt produced is what the caller sees.
    pub async fn execute<T, F, Fut>(
        &self,
        endpoint: &str,
        user: &str,
        password: &str,
        request: F,
    ) -> Result<T, CoreError>
    where
        F: Fn(Arc<PooledConnection>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let connection = self.acquire(endpoint, user, password).await?;
        self.counters.request_started();

        let mut attempt: u32 = 0;
        loop {
            let outcome = {
                let _slot = match connection.admit().await {
                    Ok(slot) => slot,
                    Err(err) => {
                        self.counters.request_finished(false);
                        return Err(err.into());
                    }
                };
                let started = Instant::now();
                let outcome = request(Arc::clone(&connection)).await;
                self.counters.attempt_finished(started.elapsed());
                outcome
            };

            match outcome {
                Ok(value) => {
                    self.counters.request_finished(true);
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_delay * attempt;
                    warn!(
                        pool.key = %connection.key(),
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "rpc attempt failed; retrying"
                    );
                    self.counters.retry_scheduled();
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    debug!(
                        pool.key = %connection.key(),
                        attempts = attempt + 1,
                        error = %err,
                        "rpc request failed"
                    );
                    self.counters.request_finished(false);
                    return Err(err.into());
                }
            }
        }
    }

    /// Drop transports that have not admitted a request within the idle
    /// timeout. Returns how many were removed.
    pub async fn evict_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let capacity = self.config.max_connections_per_endpoint;
        let mut connections = self.connections.write().await;
        let before = connections.len();
        connections.retain(|key, connection| {
            let keep = connection.busy(capacity) || connection.idle_for() < idle_timeout;
            if !keep {
                info!(pool.key = %key, idle_ms = connection.idle_for().as_millis() as u64, "evicting idle connection");
                connection.close();
            }
            keep
        });
        let removed = before - connections.len();
        if removed > 0 {
            self.counters.connections_dropped(removed as u64);
        }
        removed
    }

    pub fn statistics(&self) -> PoolStatistics {
        self.counters.snapshot()
    }

    /// Log pool health and flag a degraded success rate. Returns `false`
    /// when the pool should be considered degraded.
    pub fn report_health(&self) -> bool {
        let stats = self.statistics();
        let finished = stats.successful_requests + stats.failed_requests;
        let success_rate = stats.success_rate();
        info!(
            live_connections = stats.live_connections,
            total_requests = stats.total_requests,
            retries = stats.retries,
            success_rate,
            avg_latency_ms = stats.average_latency_ms,
            "connection pool health"
        );

        if finished >= MIN_HEALTH_SAMPLE && success_rate < HEALTHY_SUCCESS_RATE {
            warn!(
                success_rate,
                finished,
                "connection pool success rate below {:.0}%",
                HEALTHY_SUCCESS_RATE * 100.0
            );
            return false;
        }
        true
    }

    /// Spawn the periodic sweep: evict idle transports and report health
    /// every `health_check_interval`, independent of request traffic.
    ///
    /// The task holds only a weak reference and ends once the pool is
    /// dropped.
    pub fn spawn_health_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        let period = self.config.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.evict_idle().await;
                pool.report_health();
            }
        })
    }

    /// Close and forget every pooled transport.
    pub async fn shutdown(&self) {
        self.creation_gate.close();
        let mut connections = self.connections.write().await;
        let count = connections.len() as u64;
        for connection in connections.values() {
            connection.close();
        }
        connections.clear();
        if count > 0 {
            self.counters.connections_dropped(count);
        }
        info!(closed = count, "connection pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    const ENDPOINT: &str = "http://127.0.0.1:6824";

    fn fast_retry_config(max_retries: u32) -> PoolConfig {
        PoolConfig {
            max_retries,
            retry_delay: Duration::from_millis(1),
            ..PoolConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquire_creates_one_transport() {
        let pool = Arc::new(ConnectionPool::new(PoolConfig::default()));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.acquire(ENDPOINT, "alice", "secret").await })
            })
            .collect();

        let mut connections = Vec::new();
        for handle in handles {
            connections.push(handle.await.expect("task must join").expect("acquire"));
        }

        let first = &connections[0];
        assert!(connections.iter().all(|c| Arc::ptr_eq(c, first)));
        let stats = pool.statistics();
        assert_eq!(stats.connections_created, 1);
        assert_eq!(stats.live_connections, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_creation_keeps_one_transport_per_key() {
        let pool = Arc::new(ConnectionPool::new(PoolConfig {
            max_concurrent_creations: 4,
            ..PoolConfig::default()
        }));

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let pool = Arc::clone(&pool);
                let user = format!("user-{}", i % 8);
                tokio::spawn(async move {
                    let conn = pool.acquire(ENDPOINT, &user, "secret").await;
                    (user, conn)
                })
            })
            .collect();

        let mut by_user: HashMap<String, Arc<PooledConnection>> = HashMap::new();
        for handle in handles {
            let (user, conn) = handle.await.expect("task must join");
            let conn = conn.expect("acquire");
            let first = by_user.entry(user).or_insert_with(|| Arc::clone(&conn));
            assert!(Arc::ptr_eq(first, &conn));
        }

        assert_eq!(by_user.len(), 8);
        let stats = pool.statistics();
        assert_eq!(stats.connections_created, 8);
        assert_eq!(stats.live_connections, 8);
    }

    #[tokio::test]
    async fn distinct_credentials_get_distinct_transports() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let a = pool.acquire(ENDPOINT, "alice", "one").await.unwrap();
        let b = pool.acquire(ENDPOINT, "bob", "two").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.statistics().connections_created, 2);
    }

    #[tokio::test]
    async fn always_failing_transport_is_attempted_max_retries_plus_one() {
        let pool = ConnectionPool::new(fast_retry_config(3));
        let attempts = AtomicU32::new(0);

        let result: Result<(), CoreError> = pool
            .execute(ENDPOINT, "alice", "secret", |_conn| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(RpcError::Transport("connection refused".into())) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(
            result.unwrap_err(),
            CoreError::Rpc(RpcError::Transport("connection refused".into()))
        );
        let stats = pool.statistics();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.total_attempts, 4);
        assert_eq!(stats.retries, 3);
        assert_eq!(stats.failed_requests, 1);
    }

    #[tokio::test]
    async fn server_errors_are_not_retried() {
        let pool = ConnectionPool::new(fast_retry_config(3));
        let attempts = AtomicU32::new(0);

        let result: Result<(), CoreError> = pool
            .execute(ENDPOINT, "alice", "secret", |_conn| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(RpcError::ServerError {
                        code: -26,
                        message: "mandatory-script-verify-flag-failed".into(),
                    })
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(CoreError::Rpc(RpcError::ServerError { code: -26, .. }))
        ));
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let pool = ConnectionPool::new(fast_retry_config(3));
        let attempts = AtomicU32::new(0);

        let result = pool
            .execute(ENDPOINT, "alice", "secret", |_conn| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(RpcError::HttpStatus {
                            status: 503,
                            body: String::new(),
                        })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .expect("third attempt succeeds");

        assert_eq!(result, 2);
        let stats = pool.statistics();
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.retries, 2);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let pool = ConnectionPool::new(fast_retry_config(0));
        let attempts = AtomicU32::new(0);
        let _ = pool
            .execute(ENDPOINT, "u", "p", |_conn| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RpcError::Timeout) }
            })
            .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn evict_idle_drops_expired_connections() {
        let pool = ConnectionPool::new(PoolConfig {
            idle_timeout: Duration::from_millis(10),
            ..PoolConfig::default()
        });
        pool.acquire(ENDPOINT, "u", "p").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(pool.evict_idle().await, 1);
        let stats = pool.statistics();
        assert_eq!(stats.live_connections, 0);
        assert_eq!(stats.connections_evicted, 1);

        // A later acquire opens a fresh transport.
        pool.acquire(ENDPOINT, "u", "p").await.unwrap();
        assert_eq!(pool.statistics().connections_created, 2);
    }

    #[tokio::test]
    async fn health_report_flags_low_success_rate() {
        let pool = ConnectionPool::new(fast_retry_config(0));
        for i in 0..120u32 {
            let _ = pool
                .execute(ENDPOINT, "u", "p", |_conn| async move {
                    if i % 5 == 0 {
                        Err(RpcError::Timeout)
                    } else {
                        Ok(())
                    }
                })
                .await;
        }
        // 80% success over 120 requests.
        assert!(!pool.report_health());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_transports() {
        let pool = ConnectionPool::new(PoolConfig::default());
        pool.acquire(ENDPOINT, "u", "p").await.unwrap();
        pool.shutdown().await;
        assert_eq!(pool.statistics().live_connections, 0);
        assert!(pool.acquire(ENDPOINT, "u", "p").await.is_err());
    }
}
