//! Request batching and deduplication in front of a [`ChainRpc`] provider.
//!
//! Callers enqueue requests into one queue per operation kind and get a
//! future back. A queue is flushed as soon as it holds `max_batch_size`
//! requests, and by a fixed-interval timer once it reaches
//! `min_batch_size` or its oldest request has waited `max_queue_delay`.
//!
//! A flush takes up to `max_batch_size` requests, orders them by
//! descending priority (FIFO within one priority), collapses identical
//! queries into one RPC call, and dispatches with a fixed fan-out.
//! There is no retry at this layer; the connection pool owns retries.

mod queue;
mod stats;

pub use queue::PendingRequest;
pub use stats::BatchStatistics;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::config::BatchConfig;
use crate::error::CoreError;
use crate::rpc::ChainRpc;
use crate::types::{AccountState, TxStatus};

use queue::{BatchedRequest, OperationQueue, Responder};
use stats::BatchCounters;

// ==============================================================================
// Operations
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    SubmitTransaction,
    GetStatus,
    GetAccountState,
}

impl OperationKind {
    pub const ALL: [Self; 3] = [
        Self::SubmitTransaction,
        Self::GetStatus,
        Self::GetAccountState,
    ];

    fn index(self) -> usize {
        match self {
            Self::SubmitTransaction => 0,
            Self::GetStatus => 1,
            Self::GetAccountState => 2,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SubmitTransaction => write!(f, "submit_transaction"),
            Self::GetStatus => write!(f, "get_status"),
            Self::GetAccountState => write!(f, "get_account_state"),
        }
    }
}

/// Payload of a batched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRequest {
    /// Signed raw transaction, hex encoded.
    SubmitTransaction(String),
    /// Transaction id to poll.
    GetStatus(String),
    /// Address to query.
    GetAccountState(String),
}

impl BatchRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::SubmitTransaction(_) => OperationKind::SubmitTransaction,
            Self::GetStatus(_) => OperationKind::GetStatus,
            Self::GetAccountState(_) => OperationKind::GetAccountState,
        }
    }

    /// Key identical queries share. Submissions are never merged.
    fn dedup_key(&self) -> Option<&str> {
        match self {
            Self::SubmitTransaction(_) => None,
            Self::GetStatus(txid) => Some(txid),
            Self::GetAccountState(address) => Some(address),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutput {
    Submitted(String),
    Status(TxStatus),
    Account(AccountState),
}

async fn execute(rpc: &dyn ChainRpc, request: &BatchRequest) -> Result<BatchOutput, CoreError> {
    match request {
        BatchRequest::SubmitTransaction(raw_tx) => {
            rpc.submit_transaction(raw_tx).await.map(BatchOutput::Submitted)
        }
        BatchRequest::GetStatus(txid) => rpc.get_transaction_status(txid).await.map(BatchOutput::Status),
        BatchRequest::GetAccountState(address) => {
            rpc.get_account_state(address).await.map(BatchOutput::Account)
        }
    }
}

fn unexpected_output(kind: OperationKind, output: &BatchOutput) -> CoreError {
    CoreError::InvalidResponse(format!("{kind} request resolved with {output:?}"))
}

// ==============================================================================
// Processor
// ==============================================================================

pub struct BatchProcessor {
    rpc: Arc<dyn ChainRpc>,
    config: BatchConfig,
    queues: [OperationQueue; 3],
    batch_slots: Semaphore,
    next_id: AtomicU64,
    closed: AtomicBool,
    counters: BatchCounters,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl BatchProcessor {
    /// Create the processor and, when batching is enabled, its flush timer.
    /// Must be called from within a tokio runtime.
    pub fn start(rpc: Arc<dyn ChainRpc>, config: BatchConfig) -> Arc<Self> {
        let processor = Arc::new(Self {
            rpc,
            batch_slots: Semaphore::new(config.max_concurrent_batches.max(1)),
            config,
            queues: Default::default(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            counters: BatchCounters::default(),
            timer: Mutex::new(None),
        });

        if processor.config.enabled {
            let timer = processor.spawn_timer();
            *processor.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(timer);
        }
        info!(
            enabled = processor.config.enabled,
            max_batch_size = processor.config.max_batch_size,
            min_batch_size = processor.config.min_batch_size,
            "batch processor started"
        );
        processor
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn statistics(&self) -> BatchStatistics {
        self.counters.snapshot()
    }

    /// Requests currently waiting in the queue for `kind`.
    pub fn queued(&self, kind: OperationKind) -> usize {
        self.queue(kind).len()
    }

    fn queue(&self, kind: OperationKind) -> &OperationQueue {
        &self.queues[kind.index()]
    }

    /// Queue `request` and return a future for its result.
    ///
    /// Reaching `max_batch_size` schedules an immediate flush. With batching
    /// disabled the request is executed right away instead.
    pub fn enqueue(self: &Arc<Self>, request: BatchRequest, priority: i32) -> PendingRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (responder, receiver) = oneshot::channel();
        let pending = PendingRequest::new(id, receiver);

        if self.closed.load(Ordering::Acquire) {
            let _ = responder.send(Err(CoreError::QueueClosed));
            return pending;
        }

        if !self.config.enabled {
            self.counters.bypassed();
            let rpc = Arc::clone(&self.rpc);
            tokio::spawn(async move {
                let _ = responder.send(execute(rpc.as_ref(), &request).await);
            });
            return pending;
        }

        let kind = request.kind();
        let depth = match self.queue(kind).push(BatchedRequest {
            id,
            request,
            priority,
            created_at: Instant::now(),
            responder,
        }) {
            Ok(depth) => depth,
            Err(rejected) => {
                let _ = rejected.responder.send(Err(CoreError::QueueClosed));
                return pending;
            }
        };
        trace!(batch.kind = %kind, request.id = id, priority, depth, "request enqueued");

        if depth >= self.config.max_batch_size {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.flush(kind).await });
        }
        pending
    }

    /// Run `request` through the queue, or straight against the provider
    /// when batching is disabled.
    pub async fn submit(
        self: &Arc<Self>,
        request: BatchRequest,
        priority: i32,
    ) -> Result<BatchOutput, CoreError> {
        if !self.config.enabled {
            self.counters.bypassed();
            return execute(self.rpc.as_ref(), &request).await;
        }
        self.enqueue(request, priority).await
    }

    pub async fn submit_transaction(
        self: &Arc<Self>,
        raw_tx: &str,
        priority: i32,
    ) -> Result<String, CoreError> {
        match self
            .submit(BatchRequest::SubmitTransaction(raw_tx.to_owned()), priority)
            .await?
        {
            BatchOutput::Submitted(txid) => Ok(txid),
            other => Err(unexpected_output(OperationKind::SubmitTransaction, &other)),
        }
    }

    pub async fn get_transaction_status(
        self: &Arc<Self>,
        txid: &str,
        priority: i32,
    ) -> Result<TxStatus, CoreError> {
        match self
            .submit(BatchRequest::GetStatus(txid.to_owned()), priority)
            .await?
        {
            BatchOutput::Status(status) => Ok(status),
            other => Err(unexpected_output(OperationKind::GetStatus, &other)),
        }
    }

    pub async fn get_account_state(
        self: &Arc<Self>,
        address: &str,
        priority: i32,
    ) -> Result<AccountState, CoreError> {
        match self
            .submit(BatchRequest::GetAccountState(address.to_owned()), priority)
            .await?
        {
            BatchOutput::Account(state) => Ok(state),
            other => Err(unexpected_output(OperationKind::GetAccountState, &other)),
        }
    }

    /// Drain one batch from the queue for `kind` and resolve every request
    /// in it.
    pub async fn flush(&self, kind: OperationKind) {
        let Ok(_slot) = self.batch_slots.acquire().await else {
            return;
        };

        let mut batch = self.queue(kind).drain(self.config.max_batch_size.max(1));
        if batch.is_empty() {
            return;
        }
        let started = Instant::now();
        let size = batch.len();

        // Stable: equal priorities keep arrival order.
        batch.sort_by(|a, b| b.priority.cmp(&a.priority));
        trace!(
            batch.kind = %kind,
            order = ?batch.iter().map(|item| item.id).collect::<Vec<_>>(),
            "batch dispatch order"
        );
        let groups = group_requests(batch);
        let unique = groups.len();
        debug!(batch.kind = %kind, batch.size = size, unique, "flushing batch");

        let rpc = &self.rpc;
        stream::iter(groups)
            .map(|(request, waiters)| async move {
                let result = execute(rpc.as_ref(), &request).await;
                if let Err(err) = &result {
                    debug!(batch.kind = %kind, error = %err, waiters = waiters.len(), "batched request failed");
                }
                for waiter in waiters {
                    let _ = waiter.send(result.clone());
                }
            })
            .buffer_unordered(self.config.dispatch_parallelism.max(1))
            .collect::<Vec<()>>()
            .await;

        let elapsed = started.elapsed();
        self.counters.batch_finished(size, unique, elapsed);
        debug!(
            batch.kind = %kind,
            batch.size = size,
            elapsed_ms = elapsed.as_millis() as u64,
            "batch resolved"
        );
    }

    fn due(&self, kind: OperationKind) -> bool {
        let queue = self.queue(kind);
        let depth = queue.len();
        if depth == 0 {
            return false;
        }
        depth >= self.config.min_batch_size
            || queue
                .oldest_wait()
                .is_some_and(|waited| waited >= self.config.max_queue_delay)
    }

    /// The timer holds only a weak reference and ends once the processor is
    /// dropped.
    fn spawn_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let processor: Weak<Self> = Arc::downgrade(self);
        let period = self.config.batch_timeout;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(processor) = processor.upgrade() else {
                    break;
                };
                for kind in OperationKind::ALL {
                    if processor.due(kind) {
                        let this = Arc::clone(&processor);
                        tokio::spawn(async move { this.flush(kind).await });
                    }
                }
            }
        })
    }

    /// Stop the timer, reject new requests, and flush everything queued.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(timer) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }

        for kind in OperationKind::ALL {
            self.queue(kind).close();
            while !self.queue(kind).is_empty() {
                self.flush(kind).await;
            }
        }
        info!(stats = ?self.statistics(), "batch processor shut down");
    }
}

/// Group a priority-ordered batch into one entry per RPC call. Query
/// duplicates join the first request with the same key.
fn group_requests(batch: Vec<BatchedRequest>) -> Vec<(BatchRequest, Vec<Responder>)> {
    let mut groups: Vec<(BatchRequest, Vec<Responder>)> = Vec::with_capacity(batch.len());
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for item in batch {
        if let Some(key) = item.request.dedup_key() {
            if let Some(&slot) = by_key.get(key) {
                groups[slot].1.push(item.responder);
                continue;
            }
            by_key.insert(key.to_owned(), groups.len());
        }
        groups.push((item.request, vec![item.responder]));
    }
    groups
}
