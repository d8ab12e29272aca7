//! In-process loopback server.
//!
//! Keeps real revision semantics: deltas must be based on the head revision,
//! conflicting deltas are refused, and every committed delta stays available
//! for catch-up. Failures can be injected per endpoint to exercise the
//! replica's recovery paths.

use super::{DatabaseMetadata, DeltaPage, SnapshotResponse, Transport, TransportResult};
use crate::config::Context;
use crate::error::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use datasync_engine::{Dataset, Delta, DeltaRequest, Operation, Revision};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

type DatabaseKey = (Context, String);

/// Transport endpoints, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Metadata,
    CreateDatabase,
    Snapshot,
    Deltas,
    PostDelta,
}

#[derive(Debug)]
struct InjectedFailure {
    endpoint: Endpoint,
    error: TransportError,
    /// Commit the submitted delta before failing
    after_commit: bool,
}

#[derive(Debug)]
struct RemoteDatabase {
    dataset: Dataset,
    deltas: Vec<Delta>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    removed: bool,
}

impl RemoteDatabase {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            dataset: Dataset::new(0, None),
            deltas: Vec::new(),
            created: now,
            modified: now,
            removed: false,
        }
    }

    fn metadata(&self, database_id: &str) -> DatabaseMetadata {
        DatabaseMetadata {
            database_id: database_id.to_string(),
            revision: self.dataset.revision(),
            records_count: self.dataset.len() as u64,
            created: Some(self.created),
            modified: Some(self.modified),
        }
    }

    fn commit(&mut self, request: DeltaRequest) -> TransportResult<Revision> {
        let head = self.dataset.revision();
        if request.base_revision != head {
            return Err(TransportError::revision_mismatch(format!(
                "base revision {} is behind head {}",
                request.base_revision, head
            )));
        }

        let result = self
            .dataset
            .dry_run(head, &request.changes)
            .map_err(|e| TransportError::new(400, e.to_string()))?;
        if !result.is_clean() {
            return Err(TransportError::revision_mismatch(format!(
                "{} conflicting change(s)",
                result.conflicts.len()
            )));
        }

        let delta = request.committed(head + 1);
        self.dataset
            .apply_deltas(std::slice::from_ref(&delta))
            .map_err(|e| TransportError::server_error(e.to_string()))?;
        self.deltas.push(delta);
        self.modified = Utc::now();
        Ok(head + 1)
    }
}

/// A loopback [`Transport`] holding databases in memory.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    databases: DashMap<DatabaseKey, RemoteDatabase>,
    failures: Mutex<VecDeque<InjectedFailure>>,
    events: Mutex<Vec<String>>,
    post_delay: Mutex<Option<Duration>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a delta on behalf of another writer.
    pub fn commit_remote(
        &self,
        context: Context,
        database_id: &str,
        changes: Vec<Operation>,
    ) -> TransportResult<Revision> {
        let mut database = self
            .databases
            .entry((context, database_id.to_string()))
            .or_insert_with(RemoteDatabase::new);
        let head = database.dataset.revision();
        let request = DeltaRequest::new(uuid::Uuid::new_v4().to_string(), head, changes);
        database.commit(request)
    }

    /// Remove a database; later requests for it answer 410 until it is
    /// created again.
    pub fn remove_database(&self, context: Context, database_id: &str) {
        if let Some(mut database) = self.databases.get_mut(&(context, database_id.to_string())) {
            database.removed = true;
        }
    }

    /// Fail the next request to `endpoint` with `error`.
    pub fn fail_next(&self, endpoint: Endpoint, error: TransportError) {
        self.failures.lock().push_back(InjectedFailure {
            endpoint,
            error,
            after_commit: false,
        });
    }

    /// Commit the next submitted delta, then report `error` anyway.
    pub fn fail_next_post_after_commit(&self, error: TransportError) {
        self.failures.lock().push_back(InjectedFailure {
            endpoint: Endpoint::PostDelta,
            error,
            after_commit: true,
        });
    }

    /// Delay every delta submission, to widen race windows in tests.
    pub fn set_post_delay(&self, delay: Option<Duration>) {
        *self.post_delay.lock() = delay;
    }

    /// Requests served so far, in order.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn request_count(&self, endpoint: Endpoint) -> usize {
        let prefix = endpoint_name(endpoint);
        self.events
            .lock()
            .iter()
            .filter(|event| event.split(' ').next() == Some(prefix) && !event.ends_with(" end"))
            .count()
    }

    /// Head revision of a database, if it exists.
    pub fn head_revision(&self, context: Context, database_id: &str) -> Option<Revision> {
        self.databases
            .get(&(context, database_id.to_string()))
            .map(|database| database.dataset.revision())
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }

    fn take_failure(&self, endpoint: Endpoint) -> Option<InjectedFailure> {
        let mut failures = self.failures.lock();
        let position = failures.iter().position(|f| f.endpoint == endpoint)?;
        failures.remove(position)
    }

    fn check_failure(&self, endpoint: Endpoint) -> TransportResult<()> {
        match self.take_failure(endpoint) {
            Some(failure) => Err(failure.error),
            None => Ok(()),
        }
    }

    fn with_database<T>(
        &self,
        context: Context,
        database_id: &str,
        f: impl FnOnce(&mut RemoteDatabase) -> TransportResult<T>,
    ) -> TransportResult<T> {
        let mut database = self
            .databases
            .get_mut(&(context, database_id.to_string()))
            .ok_or_else(|| TransportError::not_found(format!("database {} not found", database_id)))?;
        if database.removed {
            return Err(TransportError::gone(format!("database {} was removed", database_id)));
        }
        f(&mut database)
    }
}

fn endpoint_name(endpoint: Endpoint) -> &'static str {
    match endpoint {
        Endpoint::Metadata => "metadata",
        Endpoint::CreateDatabase => "create",
        Endpoint::Snapshot => "snapshot",
        Endpoint::Deltas => "deltas",
        Endpoint::PostDelta => "post",
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn get_metadata(
        &self,
        context: Context,
        database_id: &str,
    ) -> TransportResult<DatabaseMetadata> {
        self.record(format!("metadata {}/{}", context, database_id));
        self.check_failure(Endpoint::Metadata)?;
        self.with_database(context, database_id, |database| {
            Ok(database.metadata(database_id))
        })
    }

    async fn create_database(
        &self,
        context: Context,
        database_id: &str,
    ) -> TransportResult<DatabaseMetadata> {
        self.record(format!("create {}/{}", context, database_id));
        self.check_failure(Endpoint::CreateDatabase)?;
        let mut database = self
            .databases
            .entry((context, database_id.to_string()))
            .or_insert_with(RemoteDatabase::new);
        if database.removed {
            *database = RemoteDatabase::new();
        }
        drop(database);
        self.with_database(context, database_id, |database| {
            Ok(database.metadata(database_id))
        })
    }

    async fn get_snapshot(
        &self,
        context: Context,
        database_id: &str,
        collection_id: Option<&str>,
    ) -> TransportResult<SnapshotResponse> {
        self.record(format!("snapshot {}/{}", context, database_id));
        self.check_failure(Endpoint::Snapshot)?;
        self.with_database(context, database_id, |database| {
            let records = database
                .dataset
                .iter()
                .filter(|record| collection_id.map_or(true, |c| record.collection_id == c))
                .cloned()
                .collect();
            Ok(SnapshotResponse {
                revision: database.dataset.revision(),
                records,
            })
        })
    }

    async fn get_deltas(
        &self,
        context: Context,
        database_id: &str,
        base_revision: Revision,
        limit: u32,
    ) -> TransportResult<DeltaPage> {
        self.record(format!("deltas {}/{} {}", context, database_id, base_revision));
        self.check_failure(Endpoint::Deltas)?;
        self.with_database(context, database_id, |database| {
            let items = database
                .deltas
                .iter()
                .filter(|delta| delta.base_revision >= base_revision)
                .take(limit as usize)
                .cloned()
                .collect();
            Ok(DeltaPage {
                items,
                revision: database.dataset.revision(),
            })
        })
    }

    async fn post_delta(
        &self,
        context: Context,
        database_id: &str,
        delta: &DeltaRequest,
    ) -> TransportResult<Revision> {
        self.record(format!("post {}/{} {} start", context, database_id, delta.delta_id));
        let delay = *self.post_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = match self.take_failure(Endpoint::PostDelta) {
            Some(failure) if failure.after_commit => self
                .with_database(context, database_id, |database| database.commit(delta.clone()))
                .and(Err(failure.error)),
            Some(failure) => Err(failure.error),
            None => self.with_database(context, database_id, |database| database.commit(delta.clone())),
        };

        self.record(format!("post {}/{} {} end", context, database_id, delta.delta_id));
        result
    }
}
