//! Unified error handling for the client.

use crate::config::ConfigError;
use datasync_engine::{Conflict, DeltaId, HistoryEntry, Revision};

/// Client error type.
///
/// Cloneable so a single in-flight update can report one outcome to every
/// caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Engine error: {0}")]
    Engine(#[from] datasync_engine::Error),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Replica {0} is gone")]
    ReplicaGone(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task queue closed")]
    QueueClosed,

    #[error("Replica {0} is closed")]
    Closed(String),
}

impl Error {
    /// The conflict details, if this is a conflict error.
    pub fn as_conflict(&self) -> Option<&ConflictError> {
        match self {
            Error::Conflict(conflict) => Some(conflict),
            _ => None,
        }
    }
}

/// A transaction rejected because some of its operations conflict.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transaction {delta_id} based on revision {base_revision} has {} conflicting operation(s)", .conflicts.len())]
pub struct ConflictError {
    pub delta_id: DeltaId,
    pub base_revision: Revision,
    /// Conflicts in operation order
    pub conflicts: Vec<Conflict>,
    /// Remote deltas applied since the base revision
    pub revision_history_since: Vec<HistoryEntry>,
}

/// A failed request to the remote store.
///
/// `status` is the HTTP status; 0 means no usable response was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("status {status}: {message}")]
pub struct TransportError {
    pub status: u16,
    pub message: String,
}

impl TransportError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// The request may or may not have reached the server.
    pub fn no_response(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn revision_mismatch(message: impl Into<String>) -> Self {
        Self::new(409, message)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(410, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// The submitted base revision is stale.
    pub fn is_revision_mismatch(&self) -> bool {
        self.status == 409 || self.status == 412
    }

    /// The remote database was removed.
    pub fn is_gone(&self) -> bool {
        self.status == 410
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Whether a submission that failed this way may still have been committed.
    pub fn is_ambiguous(&self) -> bool {
        self.status == 0 || self.is_server_error()
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
