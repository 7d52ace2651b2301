//! Bounded worker queue for asynchronous response delivery.
//!
//! # Responsibilities
//! - Cap the number of concurrently running delivery tasks
//! - Bound how long a submitter waits for a free worker
//! - Report rejection so the caller can run the task inline instead
//!
//! # Design Decisions
//! - Submission is two-step (`reserve` then `WorkSlot::spawn`): a rejected
//!   caller still owns the task's state and can run it itself
//! - A slot's permit is held by the spawned task and released when it ends,
//!   including on panic
//! - A zero timeout means "only if a worker is free right now"

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::WorkQueueConfig;
use crate::observability::metrics;

/// No worker became free within the submission timeout.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("work queue '{queue}' had no free worker within {timeout:?}")]
pub struct QueueRejected {
    pub queue: String,
    pub timeout: Duration,
}

/// A named pool of at most `max_workers` concurrent tasks.
#[derive(Debug)]
pub struct WorkQueue {
    name: String,
    permits: Arc<Semaphore>,
    max_workers: usize,
}

/// A reserved worker. Dropping it without spawning frees the worker.
#[derive(Debug)]
pub struct WorkSlot {
    permit: OwnedSemaphorePermit,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    pub fn from_config(config: &WorkQueueConfig) -> Self {
        Self::new(config.name.clone(), config.max_workers)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Workers currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait up to `timeout` for a free worker.
    pub async fn reserve(&self, timeout: Duration) -> Result<WorkSlot, QueueRejected> {
        let rejected = || {
            metrics::record_workqueue_rejection(&self.name);
            tracing::debug!(queue = %self.name, timeout_ms = timeout.as_millis() as u64, "Work queue rejected task");
            QueueRejected {
                queue: self.name.clone(),
                timeout,
            }
        };

        let permit = if timeout.is_zero() {
            Arc::clone(&self.permits).try_acquire_owned().ok()
        } else {
            tokio::time::timeout(timeout, Arc::clone(&self.permits).acquire_owned())
                .await
                .ok()
                .and_then(Result::ok)
        };
        match permit {
            Some(permit) => Ok(WorkSlot { permit }),
            None => Err(rejected()),
        }
    }
}

impl WorkSlot {
    /// Run `task` on the reserved worker.
    pub fn spawn<F>(self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self.permit;
        tokio::spawn(async move {
            let output = task.await;
            drop(permit);
            output
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_and_release() {
        let queue = WorkQueue::new("test", 2);
        let slot = queue.reserve(Duration::from_millis(10)).await.unwrap();
        assert_eq!(queue.available(), 1);

        let handle = slot.spawn(async { 42 });
        assert_eq!(handle.await.unwrap(), 42);
        assert_eq!(queue.available(), 2);
    }

    #[tokio::test]
    async fn full_queue_rejects_after_timeout() {
        let queue = WorkQueue::new("tiny", 1);
        let _held = queue.reserve(Duration::ZERO).await.unwrap();

        let err = queue.reserve(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.queue, "tiny");
        assert!(queue.reserve(Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn dropped_slot_frees_worker() {
        let queue = WorkQueue::new("q", 1);
        let slot = queue.reserve(Duration::ZERO).await.unwrap();
        drop(slot);
        assert!(queue.reserve(Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn waiting_submitter_gets_freed_worker() {
        let queue = Arc::new(WorkQueue::new("q", 1));
        let slot = queue.reserve(Duration::ZERO).await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let running = slot.spawn(async move {
            let _ = rx.await;
        });

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.reserve(Duration::from_secs(5)).await.is_ok() })
        };
        tx.send(()).unwrap();
        running.await.unwrap();
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn zero_workers_means_one() {
        assert_eq!(WorkQueue::new("q", 0).max_workers(), 1);
    }
}
