//! Conflict descriptors and resolution policies.
//!
//! Conflicts are never resolved implicitly. A dry run reports them, and a
//! caller may pick a [`ConflictPolicy`] to filter the offending operations
//! before trying again.

use crate::{error::Result, Error, Operation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Why a single field operation cannot be applied to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldConflictType {
    /// `delete` on a field the record does not have
    DeleteNonExistentField,
    /// list operation on a field the record does not have
    ModifyNonExistentField,
    /// list operation on a field whose value is not a list
    ModifyNotAListField,
    /// list index (or destination index) out of bounds
    InvalidListIndex,
    /// operation type not applicable in this position
    UnknownOperationType,
}

impl FieldConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldConflictType::DeleteNonExistentField => "delete_non_existent_field",
            FieldConflictType::ModifyNonExistentField => "modify_non_existent_field",
            FieldConflictType::ModifyNotAListField => "modify_not_a_list_field",
            FieldConflictType::InvalidListIndex => "invalid_list_index",
            FieldConflictType::UnknownOperationType => "unknown_operation_type",
        }
    }
}

impl fmt::Display for FieldConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field-level conflict inside an `update` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConflict {
    /// Position of the field operation within the record operation
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: FieldConflictType,
}

/// Record-level conflict descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictKind {
    /// `insert` of a key that is already present
    RecordAlreadyExists,
    /// `delete` of a key that is absent
    DeleteNonExistentRecord,
    /// `update` of a key that is absent
    UpdateNonExistentRecord,
    /// the key was changed by a delta applied after the base revision
    BothModified,
    /// one or more field operations of an `update` failed
    InvalidFieldChange {
        field_change_conflicts: Vec<FieldConflict>,
    },
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::RecordAlreadyExists => "record_already_exists",
            ConflictKind::DeleteNonExistentRecord => "delete_non_existent_record",
            ConflictKind::UpdateNonExistentRecord => "update_non_existent_record",
            ConflictKind::BothModified => "both_modified",
            ConflictKind::InvalidFieldChange { .. } => "invalid_field_change",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conflict attributed to one operation of a submitted sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Zero-based index of the offending operation
    pub index: usize,
    pub conflict: ConflictKind,
}

impl Conflict {
    pub fn new(index: usize, conflict: ConflictKind) -> Self {
        Self { index, conflict }
    }
}

/// Named strategy for dropping conflicting operations before a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Keep the remote state: every conflicting operation is discarded.
    #[default]
    #[serde(rename = "theirs")]
    AcceptTheirs,
}

impl ConflictPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            ConflictPolicy::AcceptTheirs => "theirs",
        }
    }

    /// Filter `operations` according to the policy.
    ///
    /// Relative order of the surviving operations is preserved.
    pub fn resolve(&self, operations: &[Operation], conflicts: &[Conflict]) -> Vec<Operation> {
        match self {
            ConflictPolicy::AcceptTheirs => {
                let rejected: HashSet<usize> = conflicts.iter().map(|c| c.index).collect();
                operations
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !rejected.contains(i))
                    .map(|(_, op)| op.clone())
                    .collect()
            }
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "theirs" => Ok(ConflictPolicy::AcceptTheirs),
            other => Err(Error::InvalidValue(format!(
                "unknown conflict policy: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;
    use serde_json::json;

    #[test]
    fn accept_theirs_drops_conflicting_operations() {
        let ops = vec![
            Operation::delete("c", "a"),
            Operation::set_fields("c", "b", [("x", Value::Integer(1))]),
            Operation::delete("c", "d"),
        ];
        let conflicts = vec![Conflict::new(0, ConflictKind::DeleteNonExistentRecord)];

        let kept = ConflictPolicy::AcceptTheirs.resolve(&ops, &conflicts);
        assert_eq!(kept, vec![ops[1].clone(), ops[2].clone()]);
    }

    #[test]
    fn policy_by_name() {
        assert_eq!(
            "theirs".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::AcceptTheirs
        );
        assert!("mine".parse::<ConflictPolicy>().is_err());
        assert_eq!(
            serde_json::to_value(ConflictPolicy::AcceptTheirs).unwrap(),
            json!("theirs")
        );
    }

    #[test]
    fn conflict_serialization() {
        let conflict = Conflict::new(
            2,
            ConflictKind::InvalidFieldChange {
                field_change_conflicts: vec![FieldConflict {
                    index: 1,
                    kind: FieldConflictType::InvalidListIndex,
                }],
            },
        );
        assert_eq!(
            serde_json::to_value(&conflict).unwrap(),
            json!({
                "index": 2,
                "conflict": {
                    "type": "invalid_field_change",
                    "field_change_conflicts": [{"index": 1, "type": "invalid_list_index"}]
                }
            })
        );
    }
}
