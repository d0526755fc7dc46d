//! The bounded slice queue: a fair semaphore sized to the worker pool
//! plus a non-blocking pending-slot check.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ApiError;

/// Admission gate for slicing work.
///
/// `tokio`'s semaphore queues waiters fairly, which gives the FIFO
/// dispatch order the queue promises. The pending counter is checked
/// offer-or-reject before waiting, so a full queue turns requests away
/// without touching the filesystem.
pub struct SliceGate {
    workers: Arc<Semaphore>,
    pending: AtomicUsize,
    max_pending: usize,
    max_wait: Duration,
}

/// Proof that a request holds a slicing worker slot. Dropping it releases
/// the slot.
pub struct SlicePermit {
    _permit: OwnedSemaphorePermit,
}

impl SliceGate {
    /// Create a gate with `workers` concurrent slots, at most
    /// `max_pending` queued requests, and a per-request wait budget.
    pub fn new(workers: usize, max_pending: usize, max_wait: Duration) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(workers.max(1))),
            pending: AtomicUsize::new(0),
            max_pending: max_pending.max(1),
            max_wait,
        }
    }

    /// Wait for a worker slot. Fails with [ApiError::QueueFull] when the
    /// pending set is at capacity and with [ApiError::QueueTimeout] when
    /// no worker frees up within the wait budget.
    pub async fn admit(&self) -> Result<SlicePermit, ApiError> {
        if self.pending.fetch_add(1, Ordering::SeqCst) >= self.max_pending {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ApiError::QueueFull);
        }
        // Decrement on every exit path, including a caller dropped at the
        // await point.
        let _pending = PendingGuard(&self.pending);

        let acquired = tokio::time::timeout(self.max_wait, self.workers.clone().acquire_owned()).await;

        match acquired {
            Err(_) => Err(ApiError::QueueTimeout),
            Ok(Err(e)) => Err(ApiError::Internal(anyhow::anyhow!(
                "slice gate semaphore closed: {}",
                e
            ))),
            Ok(Ok(permit)) => Ok(SlicePermit { _permit: permit }),
        }
    }

    /// Number of requests currently queued or being dispatched.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
