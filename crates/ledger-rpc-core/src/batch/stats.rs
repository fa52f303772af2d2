use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Point-in-time view of the batch counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStatistics {
    pub total_batches: u64,
    pub total_requests: u64,
    /// Requests answered by another request's RPC call in the same batch.
    pub deduplicated_requests: u64,
    pub bypassed_requests: u64,
    pub average_batch_size: f64,
    pub average_processing_ms: f64,
}

#[derive(Default)]
pub(super) struct BatchCounters {
    total_batches: AtomicU64,
    total_requests: AtomicU64,
    deduplicated_requests: AtomicU64,
    bypassed_requests: AtomicU64,
    processing_us: AtomicU64,
}

impl BatchCounters {
    pub(super) fn batch_finished(&self, size: usize, unique: usize, elapsed: Duration) {
        self.total_batches.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(size as u64, Ordering::Relaxed);
        self.deduplicated_requests
            .fetch_add(size.saturating_sub(unique) as u64, Ordering::Relaxed);
        self.processing_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub(super) fn bypassed(&self) {
        self.bypassed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn snapshot(&self) -> BatchStatistics {
        let total_batches = self.total_batches.load(Ordering::Relaxed);
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let processing_us = self.processing_us.load(Ordering::Relaxed);
        let (average_batch_size, average_processing_ms) = if total_batches == 0 {
            (0.0, 0.0)
        } else {
            (
                total_requests as f64 / total_batches as f64,
                processing_us as f64 / total_batches as f64 / 1_000.0,
            )
        };

        BatchStatistics {
            total_batches,
            total_requests,
            deduplicated_requests: self.deduplicated_requests.load(Ordering::Relaxed),
            bypassed_requests: self.bypassed_requests.load(Ordering::Relaxed),
            average_batch_size,
            average_processing_ms,
        }
    }
}
