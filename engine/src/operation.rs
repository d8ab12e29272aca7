//! Record-level operations.
//!
//! Changes are expressed as operations, not direct mutations. An
//! [`Operation`] targets one `(collection_id, record_id)` key and carries the
//! field operations that make up the change.

use crate::{error::Result, CollectionId, Error, FieldId, FieldOperation, RecordId, RecordKey, Value};
use serde::{Deserialize, Serialize};

/// A typed edit to one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RecordChange", into = "RecordChange")]
pub enum Operation {
    /// Create a record; fails on an existing key
    Insert {
        collection_id: CollectionId,
        record_id: RecordId,
        changes: Vec<FieldOperation>,
    },
    /// Create or replace a record unconditionally
    Set {
        collection_id: CollectionId,
        record_id: RecordId,
        changes: Vec<FieldOperation>,
    },
    /// Remove a record
    Delete {
        collection_id: CollectionId,
        record_id: RecordId,
    },
    /// Modify fields of an existing record
    Update {
        collection_id: CollectionId,
        record_id: RecordId,
        changes: Vec<FieldOperation>,
    },
}

/// Wire name of a record change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Insert,
    Set,
    Delete,
    Update,
}

fn set_operations<I, K, V>(fields: I) -> Vec<FieldOperation>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<FieldId>,
    V: Into<Value>,
{
    fields
        .into_iter()
        .map(|(field_id, value)| FieldOperation::set(field_id, value))
        .collect()
}

impl Operation {
    /// Insert a new record with the given fields.
    pub fn insert<I, K, V>(
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        fields: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<FieldId>,
        V: Into<Value>,
    {
        Operation::Insert {
            collection_id: collection_id.into(),
            record_id: record_id.into(),
            changes: set_operations(fields),
        }
    }

    /// Replace the record with exactly the given fields.
    pub fn set_fields<I, K, V>(
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        fields: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<FieldId>,
        V: Into<Value>,
    {
        Operation::Set {
            collection_id: collection_id.into(),
            record_id: record_id.into(),
            changes: set_operations(fields),
        }
    }

    pub fn delete(collection_id: impl Into<CollectionId>, record_id: impl Into<RecordId>) -> Self {
        Operation::Delete {
            collection_id: collection_id.into(),
            record_id: record_id.into(),
        }
    }

    /// Apply arbitrary field operations to an existing record.
    pub fn update(
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        changes: Vec<FieldOperation>,
    ) -> Self {
        Operation::Update {
            collection_id: collection_id.into(),
            record_id: record_id.into(),
            changes,
        }
    }

    /// Overwrite the given fields of an existing record, leaving the rest.
    pub fn update_fields<I, K, V>(
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        fields: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<FieldId>,
        V: Into<Value>,
    {
        Operation::update(collection_id, record_id, set_operations(fields))
    }

    pub fn list_item_set(
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        field_id: impl Into<FieldId>,
        index: usize,
        value: impl Into<Value>,
    ) -> Self {
        Operation::update(
            collection_id,
            record_id,
            vec![FieldOperation::list_item_set(field_id, index, value)],
        )
    }

    pub fn list_item_insert(
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        field_id: impl Into<FieldId>,
        index: usize,
        value: impl Into<Value>,
    ) -> Self {
        Operation::update(
            collection_id,
            record_id,
            vec![FieldOperation::list_item_insert(field_id, index, value)],
        )
    }

    pub fn list_item_delete(
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        field_id: impl Into<FieldId>,
        index: usize,
    ) -> Self {
        Operation::update(
            collection_id,
            record_id,
            vec![FieldOperation::list_item_delete(field_id, index)],
        )
    }

    pub fn list_item_move(
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        field_id: impl Into<FieldId>,
        index: usize,
        new_index: usize,
    ) -> Self {
        Operation::update(
            collection_id,
            record_id,
            vec![FieldOperation::list_item_move(field_id, index, new_index)],
        )
    }

    /// Get the target collection.
    pub fn collection_id(&self) -> &CollectionId {
        match self {
            Operation::Insert { collection_id, .. }
            | Operation::Set { collection_id, .. }
            | Operation::Delete { collection_id, .. }
            | Operation::Update { collection_id, .. } => collection_id,
        }
    }

    /// Get the target record ID.
    pub fn record_id(&self) -> &RecordId {
        match self {
            Operation::Insert { record_id, .. }
            | Operation::Set { record_id, .. }
            | Operation::Delete { record_id, .. }
            | Operation::Update { record_id, .. } => record_id,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.collection_id().clone(), self.record_id().clone())
    }

    pub fn operation_type(&self) -> OperationType {
        match self {
            Operation::Insert { .. } => OperationType::Insert,
            Operation::Set { .. } => OperationType::Set,
            Operation::Delete { .. } => OperationType::Delete,
            Operation::Update { .. } => OperationType::Update,
        }
    }

    /// Field operations carried by this operation (empty for `delete`).
    pub fn changes(&self) -> &[FieldOperation] {
        match self {
            Operation::Insert { changes, .. }
            | Operation::Set { changes, .. }
            | Operation::Update { changes, .. } => changes,
            Operation::Delete { .. } => &[],
        }
    }
}

/// Wire representation of an [`Operation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordChange {
    collection_id: CollectionId,
    record_id: RecordId,
    change_type: OperationType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    changes: Vec<FieldOperation>,
}

impl TryFrom<RecordChange> for Operation {
    type Error = Error;

    fn try_from(change: RecordChange) -> Result<Self> {
        let RecordChange {
            collection_id,
            record_id,
            change_type,
            changes,
        } = change;

        if collection_id.is_empty() {
            return Err(Error::MissingParameter("collection_id"));
        }
        if record_id.is_empty() {
            return Err(Error::MissingParameter("record_id"));
        }

        Ok(match change_type {
            OperationType::Insert => Operation::Insert {
                collection_id,
                record_id,
                changes,
            },
            OperationType::Set => Operation::Set {
                collection_id,
                record_id,
                changes,
            },
            OperationType::Delete => Operation::Delete {
                collection_id,
                record_id,
            },
            OperationType::Update => Operation::Update {
                collection_id,
                record_id,
                changes,
            },
        })
    }
}

impl From<Operation> for RecordChange {
    fn from(op: Operation) -> Self {
        let change_type = op.operation_type();
        let (collection_id, record_id, changes) = match op {
            Operation::Insert {
                collection_id,
                record_id,
                changes,
            }
            | Operation::Set {
                collection_id,
                record_id,
                changes,
            }
            | Operation::Update {
                collection_id,
                record_id,
                changes,
            } => (collection_id, record_id, changes),
            Operation::Delete {
                collection_id,
                record_id,
            } => (collection_id, record_id, Vec::new()),
        };

        RecordChange {
            collection_id,
            record_id,
            change_type,
            changes,
        }
    }
}
