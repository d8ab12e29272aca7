//! Error types for the datasync engine.

use crate::{conflict::FieldConflictType, CollectionId, FieldId, Revision};
use thiserror::Error;

/// All possible errors from the datasync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("collection mismatch: expected '{expected}', got '{actual}'")]
    CollectionMismatch {
        expected: CollectionId,
        actual: CollectionId,
    },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    // Invariant violations
    #[error("field operation on '{field_id}' cannot be applied: {conflict}")]
    InvalidFieldOperation {
        field_id: FieldId,
        conflict: FieldConflictType,
    },

    #[error("invalid delta sequence: expected base revision {expected}, got {actual}")]
    InvalidDeltaSequence { expected: Revision, actual: Revision },

    #[error("delta for revision {revision} is inconsistent with local state: {reason}")]
    InconsistentDelta { revision: Revision, reason: String },

    #[error("base revision {base_revision} is ahead of dataset revision {revision}")]
    RevisionAhead {
        base_revision: Revision,
        revision: Revision,
    },

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
