//! Change watchers.
//!
//! A watcher learns that a remote database advanced and schedules an update
//! for the replicas that fell behind. [`PollingWatcher`] asks the server for
//! metadata on a fixed interval. Replicas whose database is gone stop being
//! watched.

use crate::cache::CacheKey;
use crate::controller::ControllerState;
use crate::database::Database;
use crate::transport::Transport;
use dashmap::DashMap;
use datasync_engine::Revision;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Receives remote revision notifications for a set of replicas.
pub trait Watcher: Send + Sync {
    fn add_replica(&self, database: Database);

    fn remove_replica(&self, key: &CacheKey);

    /// The remote database behind `key` is at `revision`.
    ///
    /// Returns whether an update was scheduled.
    fn on_revision_advance(&self, key: &CacheKey, revision: Revision) -> bool;
}

/// Watcher that polls database metadata.
pub struct PollingWatcher {
    transport: Arc<dyn Transport>,
    interval: Duration,
    replicas: DashMap<CacheKey, Database>,
    shutdown: Notify,
}

impl PollingWatcher {
    pub fn new(transport: Arc<dyn Transport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
            replicas: DashMap::new(),
            shutdown: Notify::new(),
        }
    }

    pub fn new_shared(transport: Arc<dyn Transport>, interval: Duration) -> Arc<Self> {
        Arc::new(Self::new(transport, interval))
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Spawn the polling loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(watcher.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = watcher.shutdown.notified() => break,
                    _ = ticker.tick() => {
                        watcher.poll_once().await;
                    }
                }
            }
            tracing::debug!("Polling watcher stopped");
        })
    }

    /// Stop the polling loop.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Poll every watched replica once.
    ///
    /// Returns the number of updates scheduled.
    pub async fn poll_once(&self) -> usize {
        let watched: Vec<CacheKey> = self.replicas.iter().map(|entry| entry.key().clone()).collect();

        let mut scheduled = 0;
        for key in watched {
            match self.transport.get_metadata(key.context, &key.database_id).await {
                Ok(metadata) => {
                    if self.on_revision_advance(&key, metadata.revision) {
                        scheduled += 1;
                    }
                }
                Err(e) if e.is_gone() => {
                    tracing::info!(replica = %key, "Remote database gone, no longer watching");
                    self.remove_replica(&key);
                }
                Err(e) => {
                    tracing::warn!(replica = %key, error = %e, "Metadata poll failed");
                }
            }
        }
        scheduled
    }
}

impl Watcher for PollingWatcher {
    fn add_replica(&self, database: Database) {
        self.replicas.insert(database.key().clone(), database);
    }

    fn remove_replica(&self, key: &CacheKey) {
        self.replicas.remove(key);
    }

    fn on_revision_advance(&self, key: &CacheKey, revision: Revision) -> bool {
        let Some(database) = self.replicas.get(key).map(|entry| entry.value().clone()) else {
            return false;
        };
        if database.is_closed() || database.state() == ControllerState::Gone {
            self.replicas.remove(key);
            return false;
        }
        if revision <= database.revision() {
            return false;
        }

        tracing::debug!(replica = %key, revision, "Remote revision advanced");
        tokio::spawn(async move {
            if let Err(e) = database.update().await {
                tracing::warn!(replica = %database.key(), error = %e, "Scheduled update failed");
            }
        });
        true
    }
}

impl std::fmt::Debug for PollingWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingWatcher")
            .field("interval", &self.interval)
            .field("replicas", &self.replicas.len())
            .finish()
    }
}
