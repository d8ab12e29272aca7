//! Registry of open replicas.
//!
//! Tracks every replica a client opened so they can be found by key and
//! closed together.

use crate::cache::CacheKey;
use crate::controller::ControllerState;
use crate::database::Database;
use dashmap::DashMap;
use std::sync::Arc;

/// Open replicas, keyed by replica identity.
///
/// Thread-safe and can be shared via `Arc`.
#[derive(Debug, Default)]
pub struct ReplicaRegistry {
    replicas: DashMap<CacheKey, Database>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self {
            replicas: DashMap::new(),
        }
    }

    /// Create a new registry wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a replica, returning the one it replaced.
    pub fn register(&self, database: Database) -> Option<Database> {
        let key = database.key().clone();
        tracing::debug!(replica = %key, "Replica registered");
        self.replicas.insert(key, database)
    }

    /// Get a usable replica.
    ///
    /// Closed and gone replicas are skipped; the caller is expected to open a
    /// fresh one in their place.
    pub fn get(&self, key: &CacheKey) -> Option<Database> {
        self.replicas
            .get(key)
            .map(|entry| entry.value().clone())
            .filter(|database| !database.is_closed() && database.state() != ControllerState::Gone)
    }

    pub fn deregister(&self, key: &CacheKey) -> Option<Database> {
        let removed = self.replicas.remove(key).map(|(_, database)| database);
        if removed.is_some() {
            tracing::debug!(replica = %key, "Replica deregistered");
        }
        removed
    }

    /// Close and deregister every replica.
    ///
    /// Returns the number of replicas closed.
    pub fn close_all(&self) -> usize {
        let keys: Vec<CacheKey> = self.replicas.iter().map(|entry| entry.key().clone()).collect();

        let mut closed = 0;
        for key in keys {
            if let Some(database) = self.deregister(&key) {
                database.close();
                closed += 1;
            }
        }

        tracing::info!(closed, "Closed all replicas");
        closed
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<_> = self.replicas.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, Context, OpenOptions};
    use crate::transport::InMemoryTransport;

    async fn open(transport: Arc<InMemoryTransport>, database_id: &str) -> Database {
        Database::open(
            OpenOptions::new(Context::App, database_id).create_if_absent(true),
            &ClientConfig::default(),
            transport,
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn register_deregister() {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = ReplicaRegistry::new();

        let database = open(transport, "db").await;
        assert!(registry.register(database.clone()).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(database.key()).is_some());

        assert!(registry.deregister(database.key()).is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_all() {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = ReplicaRegistry::new();

        let a = open(transport.clone(), "a").await;
        let b = open(transport, "b").await;
        registry.register(a.clone());
        registry.register(b.clone());

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn closed_replicas_are_not_returned() {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = ReplicaRegistry::new();

        let database = open(transport, "db").await;
        registry.register(database.clone());
        database.close();

        assert!(registry.get(database.key()).is_none());
    }

    #[tokio::test]
    async fn gone_replicas_are_not_returned() {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = ReplicaRegistry::new();

        let database = open(transport.clone(), "db").await;
        registry.register(database.clone());
        transport.remove_database(Context::App, "db");
        assert!(database.update().await.is_err());

        assert_eq!(database.state(), ControllerState::Gone);
        assert!(registry.get(database.key()).is_none());
        assert_eq!(registry.len(), 1);
    }
}
