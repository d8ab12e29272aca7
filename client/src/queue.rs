//! Exclusive task queue.
//!
//! Every replica owns one queue backed by a single worker task. Jobs run one
//! at a time in submission order; a job that was enqueued but whose caller
//! dropped the result handle before it started is skipped.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// FIFO queue executing one task at a time.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    name: String,
    sender: mpsc::UnboundedSender<Job>,
}

impl TaskQueue {
    /// Create a queue and spawn its worker. Must be called inside a runtime.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let worker_name = name.clone();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job().await;
            }
            tracing::debug!(queue = %worker_name, "Task queue stopped");
        });

        Self { name, sender }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `task` and return a handle resolving to its result.
    ///
    /// The task is queued immediately, not when the handle is first polled.
    pub fn enqueue<F, Fut, T>(&self, task: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let name = self.name.clone();

        let job: Job = Box::new(move || {
            async move {
                if tx.is_closed() {
                    tracing::debug!(queue = %name, "Skipping abandoned task");
                    return;
                }
                match AssertUnwindSafe(async move { task().await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => {
                        let _ = tx.send(result);
                    }
                    Err(_) => tracing::error!(queue = %name, "Task panicked"),
                }
            }
            .boxed()
        });

        let queued = self.sender.send(job).is_ok();
        async move {
            if !queued {
                return Err(Error::QueueClosed);
            }
            rx.await.map_err(|_| Error::QueueClosed)?
        }
    }
}
