//! Database - the replica façade.
//!
//! A [`Database`] owns one [`DatasetController`] and serializes every
//! mutation through its [`TaskQueue`]: catch-up updates and patches never run
//! concurrently on the same replica, so a patch's dry run always sees a
//! consistent revision history.

use crate::cache::{Cache, CacheKey};
use crate::config::{ClientConfig, OpenOptions};
use crate::controller::{ControllerState, DatasetController};
use crate::error::{ConflictError, Error, Result};
use crate::queue::TaskQueue;
use crate::transaction::Transaction;
use crate::transport::Transport;
use datasync_engine::{
    ConflictPolicy, Dataset, DeltaId, DeltaRequest, DryRunResult, Operation, Record, Revision,
};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

type SharedUpdate = Shared<BoxFuture<'static, Result<Revision>>>;

struct Inner {
    controller: DatasetController,
    queue: TaskQueue,
    /// Delta IDs whose submission failed ambiguously, with the head they
    /// were submitted against
    possibly_missed: Mutex<HashMap<DeltaId, Revision>>,
    /// Update currently queued or running
    pending_update: Mutex<Option<SharedUpdate>>,
    max_patch_attempts: u32,
    closed: AtomicBool,
}

/// A local replica of one remote database.
///
/// Cloning is cheap; clones share the same replica.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// Open a replica and bring it to the remote head.
    pub async fn open(
        options: OpenOptions,
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        cache: Option<Arc<dyn Cache>>,
    ) -> Result<Self> {
        options.validate()?;
        let controller =
            DatasetController::new(options, transport, cache, config.delta_page_limit);
        let queue = TaskQueue::new(controller.key().to_string());

        let database = Database {
            inner: Arc::new(Inner {
                controller,
                queue,
                possibly_missed: Mutex::new(HashMap::new()),
                pending_update: Mutex::new(None),
                max_patch_attempts: config.max_patch_attempts.max(1),
                closed: AtomicBool::new(false),
            }),
        };

        let inner = Arc::clone(&database.inner);
        let revision = database
            .inner
            .queue
            .enqueue(move || async move { inner.controller.open().await })
            .await?;
        tracing::info!(replica = %database.key(), revision, "Replica opened");

        Ok(database)
    }

    pub fn key(&self) -> &CacheKey {
        self.inner.controller.key()
    }

    pub fn revision(&self) -> Revision {
        self.inner.controller.revision()
    }

    pub fn state(&self) -> ControllerState {
        self.inner.controller.state()
    }

    /// Receive the revision after every advance.
    pub fn subscribe(&self) -> watch::Receiver<Revision> {
        self.inner.controller.subscribe()
    }

    /// Run `f` against the current dataset.
    pub fn read<R>(&self, f: impl FnOnce(&Dataset) -> R) -> Result<R> {
        self.inner.ensure_usable()?;
        Ok(self.inner.controller.read(f))
    }

    /// Look up a record. `collection_id` may be omitted for a filtered replica.
    pub fn get_record(&self, collection_id: Option<&str>, record_id: &str) -> Result<Option<Record>> {
        self.read(|dataset| {
            dataset
                .get_record(collection_id, record_id)
                .map(|record| record.cloned())
        })?
        .map_err(Error::from)
    }

    /// All records of a collection, ordered by record ID.
    pub fn records(&self, collection_id: &str) -> Result<Vec<Record>> {
        self.read(|dataset| -> Result<Vec<Record>> {
            dataset.check_collection(collection_id)?;
            Ok(dataset
                .query(collection_id)
                .all()
                .into_iter()
                .cloned()
                .collect())
        })?
    }

    /// Fail with `CollectionMismatch` when `collection_id` is outside the filter.
    pub fn check_collection(&self, collection_id: &str) -> Result<()> {
        self.read(|dataset| dataset.check_collection(collection_id))?
            .map_err(Error::from)
    }

    /// Simulate operations against the current dataset.
    pub fn dry_run(&self, base_revision: Revision, operations: &[Operation]) -> Result<DryRunResult> {
        self.read(|dataset| dataset.dry_run(base_revision, operations))?
            .map_err(Error::from)
    }

    /// Start a transaction based on the current revision.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.clone(), uuid::Uuid::new_v4().to_string(), self.revision())
    }

    /// Bring the replica to the remote head.
    ///
    /// Calls made while an update is queued or running share its result.
    pub async fn update(&self) -> Result<Revision> {
        self.inner.ensure_usable()?;

        let update = {
            let mut slot = self.inner.pending_update.lock();
            match slot.as_ref() {
                Some(pending) if pending.peek().is_none() => pending.clone(),
                _ => {
                    let inner = Arc::clone(&self.inner);
                    let update = self
                        .inner
                        .queue
                        .enqueue(move || async move {
                            let result = inner.controller.catch_up().await;
                            inner.pending_update.lock().take();
                            result
                        })
                        .boxed()
                        .shared();
                    *slot = Some(update.clone());
                    update
                }
            }
        };

        update.await
    }

    /// Submit a delta through the queue, retrying on stale revisions.
    pub async fn patch(&self, request: DeltaRequest, policy: Option<ConflictPolicy>) -> Result<Revision> {
        self.inner.ensure_usable()?;
        let inner = Arc::clone(&self.inner);
        self.inner
            .queue
            .enqueue(move || async move { inner.run_patch(request, policy).await })
            .await
    }

    /// Drop revision history based before `revision`.
    ///
    /// Transactions based before the new history origin conflict on every
    /// operation. Possibly missed deltas submitted before it can no longer be
    /// recognized in history and are forgotten.
    pub async fn trim_history_before(&self, revision: Revision) -> Result<Revision> {
        self.inner.ensure_usable()?;
        let inner = Arc::clone(&self.inner);
        self.inner
            .queue
            .enqueue(move || async move {
                let origin = inner.controller.trim_history_before(revision).await?;
                inner
                    .possibly_missed
                    .lock()
                    .retain(|_, submitted_at| *submitted_at >= origin);
                Ok::<_, Error>(origin)
            })
            .await
    }

    /// Close the replica; later calls fail with [`Error::Closed`].
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::info!(replica = %self.key(), "Replica closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn ensure_usable(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed(self.controller.key().to_string()));
        }
        self.controller.ensure_available()
    }

    fn conflict(&self, delta_id: &str, base_revision: Revision, result: DryRunResult) -> Error {
        tracing::warn!(
            replica = %self.controller.key(),
            delta_id,
            conflicts = result.conflicts.len(),
            "Transaction conflicts"
        );
        Error::Conflict(ConflictError {
            delta_id: delta_id.to_string(),
            base_revision,
            conflicts: result.conflicts,
            revision_history_since: result.revision_history_since,
        })
    }

    /// Dry-run, optionally resolving conflicts by policy.
    fn resolve(
        &self,
        delta_id: &str,
        base_revision: Revision,
        operations: Vec<Operation>,
        policy: Option<ConflictPolicy>,
    ) -> Result<Vec<Operation>> {
        let result = self
            .controller
            .read(|dataset| dataset.dry_run(base_revision, &operations))?;
        if result.is_clean() {
            return Ok(operations);
        }

        let Some(policy) = policy else {
            return Err(self.conflict(delta_id, base_revision, result));
        };
        let resolved = policy.resolve(&operations, &result.conflicts);
        tracing::debug!(
            replica = %self.controller.key(),
            delta_id,
            policy = policy.name(),
            dropped = operations.len() - resolved.len(),
            "Resolved conflicts by policy"
        );

        let result = self
            .controller
            .read(|dataset| dataset.dry_run(base_revision, &resolved))?;
        if result.is_clean() {
            Ok(resolved)
        } else {
            Err(self.conflict(delta_id, base_revision, result))
        }
    }

    async fn run_patch(&self, request: DeltaRequest, policy: Option<ConflictPolicy>) -> Result<Revision> {
        self.ensure_usable()?;
        let DeltaRequest {
            delta_id,
            base_revision,
            changes: mut operations,
        } = request;

        if self.possibly_missed.lock().contains_key(&delta_id) {
            self.controller.catch_up().await?;
            self.possibly_missed.lock().remove(&delta_id);
            let committed = self
                .controller
                .read(|dataset| dataset.find_delta(&delta_id).map(|entry| entry.revision));
            if let Some(revision) = committed {
                tracing::info!(replica = %self.controller.key(), %delta_id, revision, "Delta was already committed");
                return Ok(revision);
            }
            tracing::debug!(replica = %self.controller.key(), %delta_id, "Resubmitting possibly missed delta");
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            operations = self.resolve(&delta_id, base_revision, operations, policy)?;

            let head = self.controller.revision();
            if operations.is_empty() {
                return Ok(head);
            }

            let submission = DeltaRequest::new(delta_id.clone(), head, operations.clone());
            match self.controller.submit(&submission).await {
                Ok(revision) => return self.controller.commit(submission.committed(revision)).await,
                Err(Error::Transport(e)) if e.is_revision_mismatch() && attempts < self.max_patch_attempts => {
                    tracing::debug!(replica = %self.controller.key(), %delta_id, attempts, "Stale revision, catching up");
                    let caught_up = self.controller.catch_up().await?;
                    if caught_up == head {
                        tracing::warn!(replica = %self.controller.key(), %delta_id, "Revision mismatch without remote progress");
                        return Err(Error::Transport(e));
                    }
                }
                Err(Error::Transport(e)) if e.is_ambiguous() => {
                    tracing::warn!(replica = %self.controller.key(), %delta_id, error = %e, "Delta possibly missed");
                    self.possibly_missed.lock().insert(delta_id, head);
                    return Err(Error::Transport(e));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("key", self.key())
            .field("revision", &self.revision())
            .field("closed", &self.is_closed())
            .finish()
    }
}
