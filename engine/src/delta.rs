//! Deltas: revision-bounded batches of record changes.

use crate::{DeltaId, Operation, RecordKey, Revision};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A committed delta, transforming state at `base_revision` into `revision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub base_revision: Revision,
    pub revision: Revision,
    #[serde(default)]
    pub delta_id: DeltaId,
    #[serde(default)]
    pub changes: Vec<Operation>,
}

impl Delta {
    /// Keys of every record this delta touches.
    pub fn altered_keys(&self) -> BTreeSet<RecordKey> {
        self.changes.iter().map(Operation::key).collect()
    }
}

/// A delta submitted by this replica, not yet assigned a revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRequest {
    pub delta_id: DeltaId,
    pub base_revision: Revision,
    pub changes: Vec<Operation>,
}

impl DeltaRequest {
    pub fn new(delta_id: impl Into<DeltaId>, base_revision: Revision, changes: Vec<Operation>) -> Self {
        Self {
            delta_id: delta_id.into(),
            base_revision,
            changes,
        }
    }

    /// The delta as committed by the server at `revision`.
    pub fn committed(self, revision: Revision) -> Delta {
        Delta {
            base_revision: self.base_revision,
            revision,
            delta_id: self.delta_id,
            changes: self.changes,
        }
    }
}

/// Summary of one applied delta, kept for conflict attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub base_revision: Revision,
    pub revision: Revision,
    pub delta_id: DeltaId,
    /// Keys altered by the delta
    pub altered: BTreeSet<RecordKey>,
}

impl HistoryEntry {
    pub fn from_delta(delta: &Delta) -> Self {
        Self {
            base_revision: delta.base_revision,
            revision: delta.revision,
            delta_id: delta.delta_id.clone(),
            altered: delta.altered_keys(),
        }
    }

    pub fn touches(&self, key: &RecordKey) -> bool {
        self.altered.contains(key)
    }
}
