//! Record types for storing data.

use crate::{
    conflict::{FieldConflict, FieldConflictType},
    error::Result,
    CollectionId, Error, FieldId, FieldOperation, RecordId, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unique identity of a record inside a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub collection_id: CollectionId,
    pub record_id: RecordId,
}

impl RecordKey {
    pub fn new(collection_id: impl Into<CollectionId>, record_id: impl Into<RecordId>) -> Self {
        Self {
            collection_id: collection_id.into(),
            record_id: record_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection_id, self.record_id)
    }
}

/// A data record: a keyed bag of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Collection this record belongs to
    pub collection_id: CollectionId,
    /// Identifier within the collection
    pub record_id: RecordId,
    /// Field values, ordered by field ID
    #[serde(default)]
    pub fields: BTreeMap<FieldId, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new(collection_id: impl Into<CollectionId>, record_id: impl Into<RecordId>) -> Self {
        Self {
            collection_id: collection_id.into(),
            record_id: record_id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Create a record from raw JSON field data, detecting value types.
    pub fn from_raw(
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        raw: &serde_json::Value,
    ) -> Result<Self> {
        let object = raw
            .as_object()
            .ok_or_else(|| Error::InvalidValue(format!("record data must be an object: {}", raw)))?;

        let mut record = Record::new(collection_id, record_id);
        for (field_id, value) in object {
            record.fields.insert(field_id.clone(), Value::from_json(value)?);
        }
        Ok(record)
    }

    /// Build a record by applying `changes` to an empty one.
    ///
    /// Returns every field conflict when the changes do not apply cleanly.
    pub fn materialize(
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        changes: &[FieldOperation],
    ) -> std::result::Result<Self, Vec<FieldConflict>> {
        let mut record = Record::new(collection_id, record_id);
        let conflicts = record.apply_field_operations(changes);
        if conflicts.is_empty() {
            Ok(record)
        } else {
            Err(conflicts)
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.collection_id.clone(), self.record_id.clone())
    }

    pub fn get(&self, field_id: &str) -> Option<&Value> {
        self.fields.get(field_id)
    }

    pub fn contains(&self, field_id: &str) -> bool {
        self.fields.contains_key(field_id)
    }

    pub fn field_ids(&self) -> impl Iterator<Item = &FieldId> {
        self.fields.keys()
    }

    /// Check whether `op` would apply, without mutating the record.
    pub fn dry_run_field_operation(&self, op: &FieldOperation) -> Option<FieldConflictType> {
        match op {
            FieldOperation::Set { .. } => None,
            FieldOperation::Delete { field_id } => (!self.fields.contains_key(field_id))
                .then_some(FieldConflictType::DeleteNonExistentField),
            FieldOperation::ListItemSet { field_id, .. }
            | FieldOperation::ListItemInsert { field_id, .. }
            | FieldOperation::ListItemDelete { field_id, .. }
            | FieldOperation::ListItemMove { field_id, .. } => match self.fields.get(field_id) {
                None => Some(FieldConflictType::ModifyNonExistentField),
                Some(value) if !value.is_list() => Some(FieldConflictType::ModifyNotAListField),
                Some(value) => value.dry_run_list_operation(op),
            },
        }
    }

    /// Apply a field operation in place.
    ///
    /// Callers are expected to dry-run first: an operation that does not
    /// dry-run cleanly is an invariant violation and leaves the record as is.
    pub fn apply_field_operation(&mut self, op: &FieldOperation) -> Result<()> {
        if let Some(conflict) = self.dry_run_field_operation(op) {
            return Err(Error::InvalidFieldOperation {
                field_id: op.field_id().clone(),
                conflict,
            });
        }

        match op {
            FieldOperation::Set { field_id, value } => {
                self.fields.insert(field_id.clone(), value.clone());
            }
            FieldOperation::Delete { field_id } => {
                self.fields.remove(field_id);
            }
            _ => {
                if let Some(value) = self.fields.get_mut(op.field_id()) {
                    value.apply_list_operation(op)?;
                }
            }
        }

        Ok(())
    }

    /// Apply `changes` in order, skipping (and reporting) the ones that fail.
    pub fn apply_field_operations(&mut self, changes: &[FieldOperation]) -> Vec<FieldConflict> {
        let mut conflicts = Vec::new();
        for (index, op) in changes.iter().enumerate() {
            match self.dry_run_field_operation(op) {
                Some(kind) => conflicts.push(FieldConflict { index, kind }),
                None => {
                    if let Err(Error::InvalidFieldOperation { conflict, .. }) =
                        self.apply_field_operation(op)
                    {
                        conflicts.push(FieldConflict {
                            index,
                            kind: conflict,
                        });
                    }
                }
            }
        }
        conflicts
    }
}
