//! Serialized marshaling of adapter work onto the host UI thread.
//!
//! The host hands the queue a deferred operation; operations execute
//! strictly in submission order on one worker, and either the value or the
//! failure is reported back to the caller. Each operation runs in its own
//! task so a panic inside one of them surfaces as a failed completion
//! instead of wedging the queue.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

type UiJob = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Error, PartialEq)]
pub enum UiQueueError {
    #[error("ui queue is shut down")]
    Closed,
    #[error("ui operation failed before completing")]
    Failed,
}

/// Serial execution queue standing in for the host's UI-thread dispatcher.
pub struct UiQueue {
    tx: mpsc::UnboundedSender<UiJob>,
}

impl UiQueue {
    /// Spawn the worker. Dropping the queue stops it after the jobs already
    /// submitted have run.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<UiJob>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = tokio::spawn(job).await {
                    warn!(err = %e, "ui operation aborted");
                }
            }
        });
        Self { tx }
    }

    /// Run `fut` on the UI worker and wait for its value.
    pub async fn submit<T, F>(&self, fut: F) -> Result<T, UiQueueError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: UiJob = Box::pin(async move {
            let _ = done_tx.send(fut.await);
        });
        self.tx.send(job).map_err(|_| UiQueueError::Closed)?;
        done_rx.await.map_err(|_| UiQueueError::Failed)
    }
}

impl Default for UiQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn returns_the_operation_value() {
        let queue = UiQueue::new();
        let value = queue.submit(async { 41 + 1 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn executes_in_submission_order() {
        let queue = Arc::new(UiQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..16 {
            let queue = queue.clone();
            let counter = counter.clone();
            handles.push(async move {
                queue
                    .submit(async move {
                        // Each job observes exactly its submission index.
                        counter.fetch_add(1, Ordering::SeqCst)
                    })
                    .await
                    .map(|seen| (i, seen))
            });
        }
        // Submissions happen sequentially here, so order is deterministic.
        for handle in handles {
            let (i, seen) = handle.await.unwrap();
            assert_eq!(i, seen);
        }
    }

    #[tokio::test]
    async fn panicking_operation_fails_without_wedging() {
        let queue = UiQueue::new();
        let failed = queue
            .submit(async {
                panic!("operation blew up");
                #[allow(unreachable_code)]
                0
            })
            .await;
        assert_eq!(failed, Err(UiQueueError::Failed));
        // The next operation still runs.
        assert_eq!(queue.submit(async { 7 }).await.unwrap(), 7);
    }
}
