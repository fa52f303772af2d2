use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStatistics {
    pub live_connections: u64,
    pub connections_created: u64,
    pub connections_evicted: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_attempts: u64,
    pub retries: u64,
    pub average_latency_ms: f64,
}

impl PoolStatistics {
    /// Fraction of finished requests that succeeded; `1.0` before any
    /// request has finished.
    pub fn success_rate(&self) -> f64 {
        let finished = self.successful_requests + self.failed_requests;
        if finished == 0 {
            1.0
        } else {
            self.successful_requests as f64 / finished as f64
        }
    }
}

#[derive(Default)]
pub(super) struct PoolCounters {
    live_connections: AtomicU64,
    connections_created: AtomicU64,
    connections_evicted: AtomicU64,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_attempts: AtomicU64,
    retries: AtomicU64,
    attempt_latency_us: AtomicU64,
}

impl PoolCounters {
    pub(super) fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
        self.live_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn connections_dropped(&self, count: u64) {
        self.connections_evicted.fetch_add(count, Ordering::Relaxed);
        self.live_connections.fetch_sub(count, Ordering::Relaxed);
    }

    pub(super) fn request_started(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn attempt_finished(&self, latency: Duration) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        self.attempt_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub(super) fn retry_scheduled(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn request_finished(&self, success: bool) {
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(super) fn snapshot(&self) -> PoolStatistics {
        let total_attempts = self.total_attempts.load(Ordering::Relaxed);
        let latency_us = self.attempt_latency_us.load(Ordering::Relaxed);
        let average_latency_ms = if total_attempts == 0 {
            0.0
        } else {
            latency_us as f64 / total_attempts as f64 / 1_000.0
        };

        PoolStatistics {
            live_connections: self.live_connections.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_evicted: self.connections_evicted.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            total_attempts,
            retries: self.retries.load(Ordering::Relaxed),
            average_latency_ms,
        }
    }
}
