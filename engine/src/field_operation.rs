//! Field-level edits.
//!
//! A [`FieldOperation`] changes exactly one field of one record. On the wire
//! it is a `{field_id, change_type, value?, list_item?, list_item_dest?}`
//! object; in memory it is a closed enum, so every consumer matches on the
//! full set of change types.

use crate::{error::Result, Error, FieldId, Value};
use serde::{Deserialize, Serialize};

/// A single typed edit to one field of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldChange", into = "FieldChange")]
pub enum FieldOperation {
    /// Create or overwrite the field
    Set { field_id: FieldId, value: Value },
    /// Remove the field
    Delete { field_id: FieldId },
    /// Replace the list item at `index`
    ListItemSet {
        field_id: FieldId,
        index: usize,
        value: Value,
    },
    /// Insert before `index` (`index == len` appends)
    ListItemInsert {
        field_id: FieldId,
        index: usize,
        value: Value,
    },
    /// Remove the list item at `index`
    ListItemDelete { field_id: FieldId, index: usize },
    /// Move the item at `index` so it ends up at `new_index`
    ListItemMove {
        field_id: FieldId,
        index: usize,
        new_index: usize,
    },
}

impl FieldOperation {
    pub fn set(field_id: impl Into<FieldId>, value: impl Into<Value>) -> Self {
        FieldOperation::Set {
            field_id: field_id.into(),
            value: value.into(),
        }
    }

    pub fn delete(field_id: impl Into<FieldId>) -> Self {
        FieldOperation::Delete {
            field_id: field_id.into(),
        }
    }

    pub fn list_item_set(field_id: impl Into<FieldId>, index: usize, value: impl Into<Value>) -> Self {
        FieldOperation::ListItemSet {
            field_id: field_id.into(),
            index,
            value: value.into(),
        }
    }

    pub fn list_item_insert(
        field_id: impl Into<FieldId>,
        index: usize,
        value: impl Into<Value>,
    ) -> Self {
        FieldOperation::ListItemInsert {
            field_id: field_id.into(),
            index,
            value: value.into(),
        }
    }

    pub fn list_item_delete(field_id: impl Into<FieldId>, index: usize) -> Self {
        FieldOperation::ListItemDelete {
            field_id: field_id.into(),
            index,
        }
    }

    pub fn list_item_move(field_id: impl Into<FieldId>, index: usize, new_index: usize) -> Self {
        FieldOperation::ListItemMove {
            field_id: field_id.into(),
            index,
            new_index,
        }
    }

    /// The field this operation targets.
    pub fn field_id(&self) -> &FieldId {
        match self {
            FieldOperation::Set { field_id, .. }
            | FieldOperation::Delete { field_id }
            | FieldOperation::ListItemSet { field_id, .. }
            | FieldOperation::ListItemInsert { field_id, .. }
            | FieldOperation::ListItemDelete { field_id, .. }
            | FieldOperation::ListItemMove { field_id, .. } => field_id,
        }
    }

    pub fn change_type(&self) -> FieldChangeType {
        match self {
            FieldOperation::Set { .. } => FieldChangeType::Set,
            FieldOperation::Delete { .. } => FieldChangeType::Delete,
            FieldOperation::ListItemSet { .. } => FieldChangeType::ListItemSet,
            FieldOperation::ListItemInsert { .. } => FieldChangeType::ListItemInsert,
            FieldOperation::ListItemDelete { .. } => FieldChangeType::ListItemDelete,
            FieldOperation::ListItemMove { .. } => FieldChangeType::ListItemMove,
        }
    }

    /// Whether this operation addresses an item of a list field.
    pub fn is_list_operation(&self) -> bool {
        !matches!(
            self,
            FieldOperation::Set { .. } | FieldOperation::Delete { .. }
        )
    }
}

/// Wire name of a field change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldChangeType {
    Set,
    Delete,
    ListItemSet,
    ListItemInsert,
    ListItemDelete,
    ListItemMove,
}

/// Wire representation of a [`FieldOperation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FieldChange {
    field_id: FieldId,
    change_type: FieldChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_item: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_item_dest: Option<usize>,
}

impl TryFrom<FieldChange> for FieldOperation {
    type Error = Error;

    fn try_from(change: FieldChange) -> Result<Self> {
        let FieldChange {
            field_id,
            change_type,
            value,
            list_item,
            list_item_dest,
        } = change;

        let missing = |what: &str| {
            Error::InvalidValue(format!(
                "{:?} change of field '{}' is missing '{}'",
                change_type, field_id, what
            ))
        };
        let payload = || value.clone().ok_or_else(|| missing("value"));
        let index = || list_item.ok_or_else(|| missing("list_item"));

        Ok(match change_type {
            FieldChangeType::Set => FieldOperation::Set {
                value: payload()?,
                field_id: field_id.clone(),
            },
            FieldChangeType::Delete => FieldOperation::Delete {
                field_id: field_id.clone(),
            },
            FieldChangeType::ListItemSet => FieldOperation::ListItemSet {
                index: index()?,
                value: payload()?,
                field_id: field_id.clone(),
            },
            FieldChangeType::ListItemInsert => FieldOperation::ListItemInsert {
                index: index()?,
                value: payload()?,
                field_id: field_id.clone(),
            },
            FieldChangeType::ListItemDelete => FieldOperation::ListItemDelete {
                index: index()?,
                field_id: field_id.clone(),
            },
            FieldChangeType::ListItemMove => FieldOperation::ListItemMove {
                index: index()?,
                new_index: list_item_dest.ok_or_else(|| missing("list_item_dest"))?,
                field_id: field_id.clone(),
            },
        })
    }
}

impl From<FieldOperation> for FieldChange {
    fn from(op: FieldOperation) -> Self {
        let change_type = op.change_type();
        let (field_id, value, list_item, list_item_dest) = match op {
            FieldOperation::Set { field_id, value } => (field_id, Some(value), None, None),
            FieldOperation::Delete { field_id } => (field_id, None, None, None),
            FieldOperation::ListItemSet {
                field_id,
                index,
                value,
            }
            | FieldOperation::ListItemInsert {
                field_id,
                index,
                value,
            } => (field_id, Some(value), Some(index), None),
            FieldOperation::ListItemDelete { field_id, index } => {
                (field_id, None, Some(index), None)
            }
            FieldOperation::ListItemMove {
                field_id,
                index,
                new_index,
            } => (field_id, None, Some(index), Some(new_index)),
        };

        FieldChange {
            field_id,
            change_type,
            value,
            list_item,
            list_item_dest,
        }
    }
}
