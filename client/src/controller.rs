//! Dataset controller - brings a replica's dataset to the remote head.
//!
//! The controller walks a small state machine:
//!
//! ```text
//! Uninitialized -> FetchingMetadata -> RestoringFromCache | FetchingSnapshot
//!               -> CatchingUp -> Ready
//! ```
//!
//! `Gone` is terminal and can be entered from any state once the server
//! reports the database was removed. After that every call fails with
//! [`Error::ReplicaGone`] without touching the network.

use crate::cache::{Cache, CacheKey};
use crate::config::OpenOptions;
use crate::error::{Error, Result, TransportError};
use crate::transport::{DatabaseMetadata, Transport};
use datasync_engine::{Dataset, DatasetSnapshot, Delta, DeltaRequest, Revision};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    FetchingMetadata,
    RestoringFromCache,
    FetchingSnapshot,
    CatchingUp,
    Ready,
    Gone,
}

/// Owns one replica's dataset and keeps it in sync with the server.
pub struct DatasetController {
    options: OpenOptions,
    key: CacheKey,
    transport: Arc<dyn Transport>,
    cache: Option<Arc<dyn Cache>>,
    page_limit: u32,
    state: Mutex<ControllerState>,
    metadata: Mutex<Option<DatabaseMetadata>>,
    dataset: RwLock<Dataset>,
    revision_tx: watch::Sender<Revision>,
}

impl DatasetController {
    pub fn new(
        options: OpenOptions,
        transport: Arc<dyn Transport>,
        cache: Option<Arc<dyn Cache>>,
        page_limit: u32,
    ) -> Self {
        let key = options.key();
        let cache = if options.use_cache { cache } else { None };
        let dataset = Dataset::new(0, options.collection_id.clone());
        let (revision_tx, _) = watch::channel(0);

        Self {
            options,
            key,
            transport,
            cache,
            page_limit: page_limit.max(1),
            state: Mutex::new(ControllerState::Uninitialized),
            metadata: Mutex::new(None),
            dataset: RwLock::new(dataset),
            revision_tx,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock()
    }

    fn set_state(&self, state: ControllerState) {
        let mut current = self.state.lock();
        if *current != ControllerState::Gone {
            *current = state;
        }
    }

    /// Metadata from the last successful open.
    pub fn metadata(&self) -> Option<DatabaseMetadata> {
        self.metadata.lock().clone()
    }

    pub fn revision(&self) -> Revision {
        self.dataset.read().revision()
    }

    /// Run `f` against the current dataset.
    pub fn read<R>(&self, f: impl FnOnce(&Dataset) -> R) -> R {
        f(&self.dataset.read())
    }

    pub fn subscribe(&self) -> watch::Receiver<Revision> {
        self.revision_tx.subscribe()
    }

    pub fn ensure_available(&self) -> Result<()> {
        if self.state() == ControllerState::Gone {
            return Err(self.gone());
        }
        Ok(())
    }

    fn gone(&self) -> Error {
        Error::ReplicaGone(self.key.to_string())
    }

    /// Classify a transport failure, entering `Gone` when the database was removed.
    fn classify(&self, err: TransportError) -> Error {
        if err.is_gone() {
            *self.state.lock() = ControllerState::Gone;
            tracing::error!(replica = %self.key, "Remote database removed, replica is gone");
            return self.gone();
        }
        Error::Transport(err)
    }

    /// Resolve metadata, load a dataset from cache or snapshot, then catch up.
    pub async fn open(&self) -> Result<Revision> {
        self.ensure_available()?;
        self.set_state(ControllerState::FetchingMetadata);

        let context = self.options.context;
        let database_id = self.options.database_id.as_str();
        let metadata = match self.transport.get_metadata(context, database_id).await {
            Ok(metadata) => metadata,
            Err(e) if e.is_not_found() && self.options.create_if_absent => {
                tracing::info!(replica = %self.key, "Creating remote database");
                self.transport
                    .create_database(context, database_id)
                    .await
                    .map_err(|e| self.classify(e))?
            }
            Err(e) => return Err(self.classify(e)),
        };
        let head = metadata.revision;
        *self.metadata.lock() = Some(metadata);

        let restored = match &self.cache {
            Some(cache) => {
                self.set_state(ControllerState::RestoringFromCache);
                self.restore(cache.as_ref(), head).await
            }
            None => None,
        };

        let dataset = match restored {
            Some(dataset) => dataset,
            None => {
                self.set_state(ControllerState::FetchingSnapshot);
                let snapshot = self
                    .transport
                    .get_snapshot(context, database_id, self.options.collection_id.as_deref())
                    .await
                    .map_err(|e| self.classify(e))?;
                tracing::debug!(
                    replica = %self.key,
                    revision = snapshot.revision,
                    records = snapshot.records.len(),
                    "Fetched snapshot"
                );
                Dataset::from_records(
                    snapshot.revision,
                    snapshot.records,
                    self.options.collection_id.clone(),
                )
            }
        };

        let revision = dataset.revision();
        *self.dataset.write() = dataset;
        self.revision_tx.send_replace(revision);

        self.catch_up().await
    }

    /// Load the cached dataset, discarding entries that do not decode or do
    /// not fit this replica.
    async fn restore(&self, cache: &dyn Cache, head: Revision) -> Option<Dataset> {
        let json = match cache.get(&self.key).await {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(replica = %self.key, error = %e, "Cache read failed");
                return None;
            }
        };

        let restored = DatasetSnapshot::from_json(&json)
            .and_then(Dataset::from_snapshot)
            .map_err(|e| e.to_string())
            .and_then(|dataset| {
                if dataset.collection_filter() != self.options.collection_id.as_ref() {
                    Err("collection filter differs".to_string())
                } else if dataset.revision() > head {
                    Err(format!(
                        "cached revision {} is ahead of remote head {}",
                        dataset.revision(),
                        head
                    ))
                } else {
                    Ok(dataset)
                }
            });

        match restored {
            Ok(dataset) => {
                tracing::info!(replica = %self.key, revision = dataset.revision(), "Restored from cache");
                Some(dataset)
            }
            Err(reason) => {
                tracing::warn!(replica = %self.key, %reason, "Discarding cached dataset");
                if let Err(e) = cache.remove(&self.key).await {
                    tracing::warn!(replica = %self.key, error = %e, "Cache cleanup failed");
                }
                None
            }
        }
    }

    /// Fetch and apply delta pages until the dataset reaches the remote head.
    pub async fn catch_up(&self) -> Result<Revision> {
        self.ensure_available()?;
        self.set_state(ControllerState::CatchingUp);

        loop {
            let base = self.revision();
            let page = self
                .transport
                .get_deltas(self.options.context, &self.options.database_id, base, self.page_limit)
                .await
                .map_err(|e| self.classify(e))?;

            if page.items.is_empty() {
                if page.revision > base {
                    tracing::warn!(
                        replica = %self.key,
                        revision = base,
                        head = page.revision,
                        "Server reported a newer head but returned no deltas"
                    );
                }
                break;
            }

            let revision = self.apply(&page.items)?;
            tracing::debug!(replica = %self.key, revision, deltas = page.items.len(), "Applied delta page");
            if revision >= page.revision {
                break;
            }
        }

        self.persist().await;
        self.set_state(ControllerState::Ready);
        Ok(self.revision())
    }

    /// Submit a delta to the server.
    pub async fn submit(&self, request: &DeltaRequest) -> Result<Revision> {
        self.ensure_available()?;
        self.transport
            .post_delta(self.options.context, &self.options.database_id, request)
            .await
            .map_err(|e| self.classify(e))
    }

    /// Apply a delta the server committed, then persist.
    pub async fn commit(&self, delta: Delta) -> Result<Revision> {
        let revision = self.apply(std::slice::from_ref(&delta))?;
        tracing::info!(replica = %self.key, delta_id = %delta.delta_id, revision, "Committed delta");
        self.persist().await;
        Ok(revision)
    }

    /// Drop revision history based before `revision`, then persist.
    ///
    /// Returns the new history origin.
    pub async fn trim_history_before(&self, revision: Revision) -> Result<Revision> {
        self.ensure_available()?;
        let (dropped, origin) = {
            let mut dataset = self.dataset.write();
            let before = dataset.revision_history().len();
            dataset.trim_history_before(revision);
            (before - dataset.revision_history().len(), dataset.history_origin())
        };

        if dropped > 0 {
            tracing::debug!(replica = %self.key, dropped, origin, "Trimmed revision history");
            self.persist().await;
        }
        Ok(origin)
    }

    fn apply(&self, deltas: &[Delta]) -> Result<Revision> {
        let revision = {
            let mut dataset = self.dataset.write();
            let result = dataset.apply_deltas(deltas);
            let revision = dataset.revision();
            result.map(|()| revision)
        };

        match revision {
            Ok(revision) => {
                self.revision_tx.send_replace(revision);
                Ok(revision)
            }
            Err(e) => {
                // Deltas applied before the failure are kept; publish them.
                let partial = self.revision();
                self.revision_tx.send_replace(partial);
                tracing::error!(replica = %self.key, error = %e, "Failed to apply server deltas");
                Err(e.into())
            }
        }
    }

    /// Write the dataset to cache. Failures are logged, never fatal.
    async fn persist(&self) {
        let Some(cache) = &self.cache else {
            return;
        };

        let json = self.read(|dataset| dataset.export_snapshot().to_json());
        let result = match json {
            Ok(json) => cache.set(&self.key, json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(replica = %self.key, error = %e, "Failed to persist dataset");
        }
    }
}

impl std::fmt::Debug for DatasetController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetController")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("revision", &self.revision())
            .finish()
    }
}
