//! Client - entry point that opens and tracks replicas.

use crate::cache::{Cache, CacheKey, FileCache};
use crate::config::{ClientConfig, OpenOptions};
use crate::database::Database;
use crate::error::Result;
use crate::registry::ReplicaRegistry;
use crate::transport::{HttpTransport, Transport};
use crate::watcher::{PollingWatcher, Watcher};
use std::sync::Arc;

/// Opens replicas over one transport and cache.
pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    cache: Option<Arc<dyn Cache>>,
    registry: Arc<ReplicaRegistry>,
    watcher: Option<Arc<PollingWatcher>>,
}

impl Client {
    /// Create a client over `transport`.
    ///
    /// A file cache is used when the configuration names a cache directory.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let cache = config
            .cache_dir
            .as_ref()
            .map(|dir| Arc::new(FileCache::new(dir)) as Arc<dyn Cache>);

        Self {
            config,
            transport,
            cache,
            registry: ReplicaRegistry::new_shared(),
            watcher: None,
        }
    }

    /// Create a client speaking HTTP to `config.base_url`.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        tracing::info!(base_url = %config.base_url, "Client configured");
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Replace the cache.
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Start polling for remote changes every `config.poll_interval`.
    ///
    /// Replicas already open are watched too. Must be called inside a runtime.
    pub fn enable_polling(&mut self) -> Arc<PollingWatcher> {
        if let Some(watcher) = &self.watcher {
            return Arc::clone(watcher);
        }

        let watcher = PollingWatcher::new_shared(Arc::clone(&self.transport), self.config.poll_interval);
        for key in self.registry.keys() {
            if let Some(database) = self.registry.get(&key) {
                watcher.add_replica(database);
            }
        }
        watcher.start();
        self.watcher = Some(Arc::clone(&watcher));
        watcher
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ReplicaRegistry> {
        &self.registry
    }

    /// Open a replica, or return the already open one with the same key.
    ///
    /// A replica that was closed or whose database is gone is replaced.
    pub async fn open(&self, options: OpenOptions) -> Result<Database> {
        let key = options.key();
        if let Some(database) = self.registry.get(&key) {
            return Ok(database);
        }

        let database = Database::open(
            options,
            &self.config,
            Arc::clone(&self.transport),
            self.cache.clone(),
        )
        .await?;

        if let Some(previous) = self.registry.register(database.clone()) {
            tracing::debug!(replica = %key, state = ?previous.state(), "Replacing stale replica");
            previous.close();
        }
        if let Some(watcher) = &self.watcher {
            watcher.add_replica(database.clone());
        }
        Ok(database)
    }

    /// Close one replica.
    pub fn close(&self, key: &CacheKey) -> bool {
        if let Some(watcher) = &self.watcher {
            watcher.remove_replica(key);
        }
        match self.registry.deregister(key) {
            Some(database) => {
                database.close();
                true
            }
            None => false,
        }
    }

    /// Close every open replica.
    pub fn close_all(&self) -> usize {
        if let Some(watcher) = &self.watcher {
            for key in self.registry.keys() {
                watcher.remove_replica(&key);
            }
        }
        self.registry.close_all()
    }

    /// Drop every cached dataset.
    pub async fn clear_cache(&self) -> Result<()> {
        match &self.cache {
            Some(cache) => cache.clear().await,
            None => Ok(()),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(watcher) = &self.watcher {
            watcher.stop();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.config.base_url)
            .field("replicas", &self.registry.len())
            .field("polling", &self.watcher.is_some())
            .finish()
    }
}
