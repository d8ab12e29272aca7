//! Local cache for replica snapshots.
//!
//! A cache is a flat key-value store of serialized datasets. Keys are
//! namespaced by replica identity, so replicas never share an entry.

mod file;
mod memory;

pub use file::FileCache;
pub use memory::MemoryCache;

use crate::config::Context;
use crate::error::Result;
use async_trait::async_trait;
use datasync_engine::CollectionId;
use std::fmt;

/// Identity of one replica, used to namespace its cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub context: Context,
    pub database_id: String,
    pub collection_id: Option<CollectionId>,
}

impl CacheKey {
    pub fn new(
        context: Context,
        database_id: impl Into<String>,
        collection_id: Option<CollectionId>,
    ) -> Self {
        Self {
            context,
            database_id: database_id.into(),
            collection_id,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.context, self.database_id)?;
        if let Some(collection_id) = &self.collection_id {
            write!(f, "/{}", collection_id)?;
        }
        Ok(())
    }
}

/// Key-value storage for serialized datasets.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>>;

    async fn set(&self, key: &CacheKey, value: String) -> Result<()>;

    async fn remove(&self, key: &CacheKey) -> Result<()>;

    /// Drop every entry.
    async fn clear(&self) -> Result<()>;
}
