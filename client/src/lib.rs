//! # Datasync Client
//!
//! Local replicas of remote datasync databases.
//!
//! A [`Client`] opens [`Database`] replicas. Each replica restores its dataset
//! from the local cache or a server snapshot, catches up through delta pages,
//! and then accepts [`Transaction`]s. Pushes are checked locally with a dry
//! run before anything is sent, and are retried transparently when the
//! server has moved on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use datasync_client::{Client, ClientConfig, Context, OpenOptions};
//! use datasync_engine::{ConflictPolicy, Value};
//!
//! # async fn run() -> datasync_client::Result<()> {
//! let client = Client::connect(ClientConfig::load()?)?;
//! let db = client
//!     .open(OpenOptions::new(Context::User, "notes").create_if_absent(true))
//!     .await?;
//!
//! let mut tx = db.transaction();
//! tx.set_fields("todos", "t1", [("title", Value::from("Buy milk"))])?;
//! let revision = tx.push(Some(ConflictPolicy::AcceptTheirs)).await?;
//! println!("committed at revision {}", revision);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod controller;
pub mod database;
pub mod error;
pub mod queue;
pub mod registry;
pub mod transaction;
pub mod transport;
pub mod watcher;

pub use cache::{Cache, CacheKey, FileCache, MemoryCache};
pub use client::Client;
pub use config::{ClientConfig, ConfigError, Context, OpenOptions};
pub use controller::{ControllerState, DatasetController};
pub use database::Database;
pub use error::{ConflictError, Error, Result, TransportError};
pub use queue::TaskQueue;
pub use registry::ReplicaRegistry;
pub use transaction::Transaction;
pub use transport::{
    DatabaseMetadata, DeltaPage, Endpoint, HttpTransport, InMemoryTransport, SnapshotResponse,
    Transport,
};
pub use watcher::{PollingWatcher, Watcher};
