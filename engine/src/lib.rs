//! # Datasync Engine
//!
//! A deterministic dataset engine for revisioned, server-authoritative sync.
//!
//! This crate holds the pure logic behind a local replica of a remote
//! database: typed values, record and field operations, revision bookkeeping
//! and conflict detection. It has no knowledge of the network or the disk;
//! the client crate drives it.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or platform
//! - **Deterministic**: Same inputs always produce same outputs
//! - **Atomic**: A delta is applied completely or not at all
//!
//! ## Core Concepts
//!
//! ### Values and Records
//!
//! A [`Record`] is identified by `(collection_id, record_id)` and holds a map
//! of field IDs to typed [`Value`]s. Lists are values too, and are edited with
//! index-based field operations.
//!
//! ### Operations
//!
//! Changes are expressed as [`Operation`]s on records (`insert`, `set`,
//! `delete`, `update`), each carrying [`FieldOperation`]s.
//!
//! ### Revisions and Deltas
//!
//! The server assigns every committed [`Delta`] a revision. A [`Dataset`]
//! applies deltas strictly in sequence and remembers which records each one
//! touched, so a batch of local operations based on an older revision can be
//! checked for conflicts with [`Dataset::dry_run`].
//!
//! ## Quick Start
//!
//! ```rust
//! use datasync_engine::{ConflictKind, Dataset, Delta, Operation, Value};
//!
//! // 1. Start from an empty dataset at revision 5
//! let mut dataset = Dataset::new(5, None);
//!
//! // 2. Apply a server delta
//! dataset.apply_deltas(&[Delta {
//!     base_revision: 5,
//!     revision: 6,
//!     delta_id: "d1".into(),
//!     changes: vec![Operation::insert("todos", "t1", [("title", Value::from("Buy milk"))])],
//! }]).unwrap();
//!
//! // 3. Check local operations before sending them
//! let ops = vec![Operation::insert("todos", "t1", [("title", Value::from("Again"))])];
//! let result = dataset.dry_run(6, &ops).unwrap();
//! assert_eq!(result.conflicts[0].conflict, ConflictKind::RecordAlreadyExists);
//!
//! // 4. Query records
//! assert_eq!(dataset.query("todos").count(), 1);
//! ```
//!
//! ## Persistence
//!
//! Use [`Dataset::export_snapshot`] and [`Dataset::from_snapshot`] with
//! [`DatasetSnapshot`] for caching. Snapshots serialize to JSON with
//! deterministic ordering.

pub mod conflict;
pub mod dataset;
pub mod delta;
pub mod error;
pub mod field_operation;
pub mod operation;
pub mod record;
pub mod snapshot;
pub mod value;

// Re-export main types at crate root
pub use conflict::{Conflict, ConflictKind, ConflictPolicy, FieldConflict, FieldConflictType};
pub use dataset::{Dataset, DryRunResult, QueryBuilder};
pub use delta::{Delta, DeltaRequest, HistoryEntry};
pub use error::Error;
pub use field_operation::{FieldChangeType, FieldOperation};
pub use operation::{Operation, OperationType};
pub use record::{Record, RecordKey};
pub use snapshot::{DatasetSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use value::{Value, ValueType};

/// Type aliases for clarity
pub type CollectionId = String;
pub type RecordId = String;
pub type FieldId = String;
pub type DeltaId = String;
pub type Revision = u64;
