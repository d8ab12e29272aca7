//! Dataset - the indexed, revisioned record collection.
//!
//! The dataset holds the authoritative copy of every record together with a
//! history of applied deltas. It answers two questions:
//!
//! - would a sequence of operations apply cleanly on top of a given base
//!   revision ([`Dataset::dry_run`]), without touching committed state;
//! - what does the state look like after a batch of server deltas
//!   ([`Dataset::apply_deltas`]).
//!
//! Both paths run operations against a copy-on-write [`Overlay`]: records are
//! cloned only when first touched, and committed state only changes when a
//! whole delta has been applied to the overlay successfully.

use crate::{
    conflict::{Conflict, ConflictKind},
    delta::{Delta, HistoryEntry},
    error::Result,
    CollectionId, Error, Operation, Record, RecordId, RecordKey, Revision,
};
use std::collections::HashMap;

type Index = HashMap<CollectionId, HashMap<RecordId, Record>>;

/// Outcome of a dry run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DryRunResult {
    /// Conflicts in operation order
    pub conflicts: Vec<Conflict>,
    /// History from the base revision onward; empty when there are no conflicts
    pub revision_history_since: Vec<HistoryEntry>,
}

impl DryRunResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Copy-on-write view over an index.
struct Overlay<'a> {
    base: &'a Index,
    touched: HashMap<RecordKey, Option<Record>>,
}

impl<'a> Overlay<'a> {
    fn new(base: &'a Index) -> Self {
        Self {
            base,
            touched: HashMap::new(),
        }
    }

    fn get(&self, key: &RecordKey) -> Option<&Record> {
        match self.touched.get(key) {
            Some(slot) => slot.as_ref(),
            None => self
                .base
                .get(&key.collection_id)
                .and_then(|records| records.get(&key.record_id)),
        }
    }

    fn contains(&self, key: &RecordKey) -> bool {
        self.get(key).is_some()
    }

    fn put(&mut self, record: Record) {
        self.touched.insert(record.key(), Some(record));
    }

    fn remove(&mut self, key: RecordKey) {
        self.touched.insert(key, None);
    }

    /// Simulate `op`, reporting the conflict instead of applying it.
    fn simulate(&mut self, op: &Operation) -> Option<ConflictKind> {
        let key = op.key();
        match op {
            Operation::Insert { changes, .. } | Operation::Set { changes, .. } => {
                if matches!(op, Operation::Insert { .. }) && self.contains(&key) {
                    return Some(ConflictKind::RecordAlreadyExists);
                }
                match Record::materialize(key.collection_id, key.record_id, changes) {
                    Ok(record) => self.put(record),
                    Err(field_change_conflicts) => {
                        return Some(ConflictKind::InvalidFieldChange {
                            field_change_conflicts,
                        })
                    }
                }
            }
            Operation::Delete { .. } => {
                if !self.contains(&key) {
                    return Some(ConflictKind::DeleteNonExistentRecord);
                }
                self.remove(key);
            }
            Operation::Update { changes, .. } => {
                let Some(existing) = self.get(&key) else {
                    return Some(ConflictKind::UpdateNonExistentRecord);
                };
                let mut record = existing.clone();
                let field_change_conflicts = record.apply_field_operations(changes);
                if !field_change_conflicts.is_empty() {
                    return Some(ConflictKind::InvalidFieldChange {
                        field_change_conflicts,
                    });
                }
                self.put(record);
            }
        }
        None
    }

    /// Apply a server change. Existence is not checked except where the
    /// change cannot be expressed without a record (`update`).
    fn force(&mut self, op: &Operation) -> std::result::Result<(), String> {
        let key = op.key();
        match op {
            Operation::Insert { changes, .. } | Operation::Set { changes, .. } => {
                let record = Record::materialize(key.collection_id.clone(), key.record_id.clone(), changes)
                    .map_err(|conflicts| {
                        format!("record {} cannot be built: {:?}", key, conflicts)
                    })?;
                self.put(record);
            }
            Operation::Delete { .. } => self.remove(key),
            Operation::Update { changes, .. } => {
                let mut record = self
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| format!("update of missing record {}", key))?;
                let conflicts = record.apply_field_operations(changes);
                if !conflicts.is_empty() {
                    return Err(format!("update of record {} failed: {:?}", key, conflicts));
                }
                self.put(record);
            }
        }
        Ok(())
    }

    fn into_changes(self) -> HashMap<RecordKey, Option<Record>> {
        self.touched
    }
}

/// The indexed, revisioned collection of records.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    revision: Revision,
    index: Index,
    revision_history: Vec<HistoryEntry>,
    /// Revision at which history tracking starts
    history_origin: Revision,
    collection_filter: Option<CollectionId>,
}

impl Dataset {
    /// Create an empty dataset at `revision`.
    pub fn new(revision: Revision, collection_filter: Option<CollectionId>) -> Self {
        Self {
            revision,
            index: HashMap::new(),
            revision_history: Vec::new(),
            history_origin: revision,
            collection_filter,
        }
    }

    /// Create a dataset from a full snapshot of records.
    ///
    /// Records outside the collection filter are not indexed.
    pub fn from_records(
        revision: Revision,
        records: impl IntoIterator<Item = Record>,
        collection_filter: Option<CollectionId>,
    ) -> Self {
        let mut dataset = Dataset::new(revision, collection_filter);
        for record in records {
            if dataset.accepts(&record.collection_id) {
                dataset.insert_record(record);
            }
        }
        dataset
    }

    pub(crate) fn from_parts(
        revision: Revision,
        records: impl IntoIterator<Item = Record>,
        revision_history: Vec<HistoryEntry>,
        history_origin: Revision,
        collection_filter: Option<CollectionId>,
    ) -> Self {
        let mut dataset = Dataset::from_records(revision, records, collection_filter);
        dataset.revision_history = revision_history;
        dataset.history_origin = history_origin;
        dataset
    }

    fn insert_record(&mut self, record: Record) {
        self.index
            .entry(record.collection_id.clone())
            .or_default()
            .insert(record.record_id.clone(), record);
    }

    fn accepts(&self, collection_id: &str) -> bool {
        self.collection_filter
            .as_deref()
            .map_or(true, |filter| filter == collection_id)
    }

    /// Fail with `CollectionMismatch` when `collection_id` is outside the filter.
    pub fn check_collection(&self, collection_id: &str) -> Result<()> {
        match &self.collection_filter {
            Some(filter) if filter != collection_id => Err(Error::CollectionMismatch {
                expected: filter.clone(),
                actual: collection_id.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn collection_filter(&self) -> Option<&CollectionId> {
        self.collection_filter.as_ref()
    }

    pub fn revision_history(&self) -> &[HistoryEntry] {
        &self.revision_history
    }

    pub fn history_origin(&self) -> Revision {
        self.history_origin
    }

    /// Look up a record.
    ///
    /// `collection_id` may be omitted when a collection filter is active.
    pub fn get_record(&self, collection_id: Option<&str>, record_id: &str) -> Result<Option<&Record>> {
        if record_id.is_empty() {
            return Err(Error::MissingParameter("record_id"));
        }
        let collection_id = match (collection_id, self.collection_filter.as_deref()) {
            (Some(collection_id), _) => {
                self.check_collection(collection_id)?;
                collection_id
            }
            (None, Some(filter)) => filter,
            (None, None) => return Err(Error::MissingParameter("collection_id")),
        };
        Ok(self.get(collection_id, record_id))
    }

    /// Look up a record by its full key.
    pub fn get(&self, collection_id: &str, record_id: &str) -> Option<&Record> {
        self.index
            .get(collection_id)
            .and_then(|records| records.get(record_id))
    }

    /// Iterate records of one collection.
    pub fn records<'a>(&'a self, collection_id: &str) -> impl Iterator<Item = &'a Record> + 'a {
        self.index
            .get(collection_id)
            .into_iter()
            .flat_map(|records| records.values())
    }

    /// Iterate every record.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.index.values().flat_map(|records| records.values())
    }

    /// Sorted IDs of all non-empty collections.
    pub fn collection_ids(&self) -> Vec<&CollectionId> {
        let mut ids: Vec<_> = self.index.keys().collect();
        ids.sort();
        ids
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.index.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Query records in a collection.
    pub fn query(&self, collection_id: &str) -> QueryBuilder<'_> {
        QueryBuilder::new(self.index.get(collection_id))
    }

    /// History entries from the one based on `revision` onward.
    pub fn history_since(&self, revision: Revision) -> &[HistoryEntry] {
        let start = self
            .revision_history
            .partition_point(|entry| entry.base_revision < revision);
        &self.revision_history[start..]
    }

    /// Find the history entry of an applied delta.
    pub fn find_delta(&self, delta_id: &str) -> Option<&HistoryEntry> {
        self.revision_history
            .iter()
            .rev()
            .find(|entry| entry.delta_id == delta_id)
    }

    /// Whether the record was altered by any delta applied after `revision`.
    ///
    /// A revision older than the start of the retained history cannot be
    /// vouched for and counts as modified.
    pub fn was_modified_since(&self, collection_id: &str, record_id: &str, revision: Revision) -> bool {
        if revision >= self.revision {
            return false;
        }
        if revision < self.history_origin {
            return true;
        }
        let key = RecordKey::new(collection_id, record_id);
        self.history_since(revision)
            .iter()
            .any(|entry| entry.touches(&key))
    }

    /// Simulate `operations` on top of `base_revision` without mutating state.
    pub fn dry_run(&self, base_revision: Revision, operations: &[Operation]) -> Result<DryRunResult> {
        if base_revision > self.revision {
            return Err(Error::RevisionAhead {
                base_revision,
                revision: self.revision,
            });
        }
        for op in operations {
            self.check_collection(op.collection_id())?;
        }

        let mut overlay = Overlay::new(&self.index);
        let mut conflicts = Vec::new();

        for (index, op) in operations.iter().enumerate() {
            if self.was_modified_since(op.collection_id(), op.record_id(), base_revision) {
                conflicts.push(Conflict::new(index, ConflictKind::BothModified));
                continue;
            }
            if let Some(kind) = overlay.simulate(op) {
                conflicts.push(Conflict::new(index, kind));
            }
        }

        let revision_history_since = if conflicts.is_empty() {
            Vec::new()
        } else {
            self.history_since(base_revision).to_vec()
        };

        Ok(DryRunResult {
            conflicts,
            revision_history_since,
        })
    }

    /// Apply server deltas in order.
    ///
    /// Each delta must be based on the current revision. A delta that cannot
    /// be applied leaves the dataset at the revision of the previous one.
    pub fn apply_deltas(&mut self, deltas: &[Delta]) -> Result<()> {
        for delta in deltas {
            self.apply_delta(delta)?;
        }
        Ok(())
    }

    fn apply_delta(&mut self, delta: &Delta) -> Result<()> {
        if delta.base_revision != self.revision {
            return Err(Error::InvalidDeltaSequence {
                expected: self.revision,
                actual: delta.base_revision,
            });
        }
        if delta.revision <= delta.base_revision {
            return Err(Error::InconsistentDelta {
                revision: delta.revision,
                reason: format!("does not advance past base revision {}", delta.base_revision),
            });
        }

        let changes = {
            let mut overlay = Overlay::new(&self.index);
            for op in delta.changes.iter().filter(|op| self.accepts(op.collection_id())) {
                overlay
                    .force(op)
                    .map_err(|reason| Error::InconsistentDelta {
                        revision: delta.revision,
                        reason,
                    })?;
            }
            overlay.into_changes()
        };

        let mut entry = HistoryEntry::from_delta(delta);
        entry.altered.retain(|key| self.accepts(&key.collection_id));

        for (key, slot) in changes {
            match slot {
                Some(record) => self.insert_record(record),
                None => self.remove_record(&key),
            }
        }

        self.revision_history.push(entry);
        self.revision = delta.revision;
        Ok(())
    }

    fn remove_record(&mut self, key: &RecordKey) {
        if let Some(records) = self.index.get_mut(&key.collection_id) {
            records.remove(&key.record_id);
            if records.is_empty() {
                self.index.remove(&key.collection_id);
            }
        }
    }

    /// Drop history entries based before `revision`.
    ///
    /// Transactions based on a trimmed revision will conflict on every
    /// operation, since their edits can no longer be checked.
    pub fn trim_history_before(&mut self, revision: Revision) {
        let revision = revision.min(self.revision);
        if revision <= self.history_origin {
            return;
        }
        let start = self
            .revision_history
            .partition_point(|entry| entry.base_revision < revision);
        self.revision_history.drain(..start);
        self.history_origin = revision;
    }
}

/// Builder for querying records in a collection.
#[derive(Debug)]
pub struct QueryBuilder<'a> {
    records: Option<&'a HashMap<RecordId, Record>>,
}

impl<'a> QueryBuilder<'a> {
    fn new(records: Option<&'a HashMap<RecordId, Record>>) -> Self {
        Self { records }
    }

    fn iter(&self) -> impl Iterator<Item = &'a Record> {
        self.records.into_iter().flat_map(|records| records.values())
    }

    /// Get all records, ordered by record ID.
    pub fn all(self) -> Vec<&'a Record> {
        self.filter(|_| true)
    }

    /// Count matching records.
    pub fn count(self) -> usize {
        self.records.map_or(0, HashMap::len)
    }

    /// Records matching a predicate, ordered by record ID.
    pub fn filter<F>(self, predicate: F) -> Vec<&'a Record>
    where
        F: Fn(&Record) -> bool,
    {
        let mut matched: Vec<_> = self.iter().filter(|r| predicate(r)).collect();
        matched.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        matched
    }
}
