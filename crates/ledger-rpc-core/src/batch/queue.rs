use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::CoreError;

use super::{BatchOutput, BatchRequest};

pub(super) type Responder = oneshot::Sender<Result<BatchOutput, CoreError>>;

/// One caller request waiting in a queue. Resolved exactly once through
/// `responder`.
pub(super) struct BatchedRequest {
    pub(super) id: u64,
    pub(super) request: BatchRequest,
    pub(super) priority: i32,
    pub(super) created_at: Instant,
    pub(super) responder: Responder,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<BatchedRequest>,
    closed: bool,
}

/// FIFO of requests for one operation kind.
///
/// Closing and pushing share one lock, so once [`close`](Self::close)
/// returns no request can enter the queue behind a final drain.
#[derive(Default)]
pub(super) struct OperationQueue {
    state: Mutex<QueueState>,
}

impl OperationQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append and return the queue length afterwards. A closed queue hands
    /// the request back untouched.
    pub(super) fn push(&self, request: BatchedRequest) -> Result<usize, BatchedRequest> {
        let mut state = self.lock();
        if state.closed {
            return Err(request);
        }
        state.items.push_back(request);
        Ok(state.items.len())
    }

    /// Reject every later push. Requests already queued stay for draining.
    pub(super) fn close(&self) {
        self.lock().closed = true;
    }

    pub(super) fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Remove up to `max` requests from the front.
    pub(super) fn drain(&self, max: usize) -> Vec<BatchedRequest> {
        let mut state = self.lock();
        let take = state.items.len().min(max);
        state.items.drain(..take).collect()
    }

    /// How long the front request has been waiting.
    pub(super) fn oldest_wait(&self) -> Option<Duration> {
        self.lock()
            .items
            .front()
            .map(|item| item.created_at.elapsed())
    }
}

/// Future returned by [`BatchProcessor::enqueue`](super::BatchProcessor::enqueue).
///
/// Resolves to [`CoreError::QueueClosed`] if the request is dropped
/// without being answered.
#[derive(Debug)]
pub struct PendingRequest {
    id: u64,
    receiver: oneshot::Receiver<Result<BatchOutput, CoreError>>,
}

impl PendingRequest {
    pub(super) fn new(id: u64, receiver: oneshot::Receiver<Result<BatchOutput, CoreError>>) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingRequest {
    type Output = Result<BatchOutput, CoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CoreError::QueueClosed)))
    }
}
