//! Remote store contract and its adapters.
//!
//! The replica machinery talks to the server only through [`Transport`].
//! [`HttpTransport`] speaks the REST API; [`InMemoryTransport`] is a loopback
//! server used by tests and offline development.

mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::{Endpoint, InMemoryTransport};

use crate::config::Context;
use crate::error::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datasync_engine::{Delta, DeltaRequest, Record, Revision};
use serde::{Deserialize, Serialize};

/// Result type for transport calls.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Remote database description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub database_id: String,
    /// Current head revision
    pub revision: Revision,
    #[serde(default)]
    pub records_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

/// Full database state at one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub revision: Revision,
    #[serde(default)]
    pub records: Vec<Record>,
}

/// One page of deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaPage {
    #[serde(default)]
    pub items: Vec<Delta>,
    /// Head revision reported by the server
    pub revision: Revision,
}

/// Access to the remote store.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_metadata(
        &self,
        context: Context,
        database_id: &str,
    ) -> TransportResult<DatabaseMetadata>;

    /// Create the database, or return it if it already exists.
    async fn create_database(
        &self,
        context: Context,
        database_id: &str,
    ) -> TransportResult<DatabaseMetadata>;

    async fn get_snapshot(
        &self,
        context: Context,
        database_id: &str,
        collection_id: Option<&str>,
    ) -> TransportResult<SnapshotResponse>;

    /// Deltas based on `base_revision` or later, at most `limit` of them.
    async fn get_deltas(
        &self,
        context: Context,
        database_id: &str,
        base_revision: Revision,
        limit: u32,
    ) -> TransportResult<DeltaPage>;

    /// Submit a delta, returning the revision the server committed it at.
    async fn post_delta(
        &self,
        context: Context,
        database_id: &str,
        delta: &DeltaRequest,
    ) -> TransportResult<Revision>;
}
