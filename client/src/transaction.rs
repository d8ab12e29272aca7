//! Transaction builder.

use crate::database::Database;
use crate::error::Result;
use datasync_engine::{
    CollectionId, ConflictPolicy, DeltaId, DeltaRequest, FieldId, Operation, Record, RecordId,
    RecordKey, Revision, Value,
};

/// Operations accumulated against a fixed base revision.
///
/// A transaction can be pushed more than once; repeated pushes reuse the same
/// delta ID, which lets an ambiguously failed submission be retried safely.
#[derive(Debug, Clone)]
pub struct Transaction {
    database: Database,
    delta_id: DeltaId,
    base_revision: Revision,
    operations: Vec<Operation>,
}

impl Transaction {
    pub(crate) fn new(database: Database, delta_id: DeltaId, base_revision: Revision) -> Self {
        Self {
            database,
            delta_id,
            base_revision,
            operations: Vec::new(),
        }
    }

    pub fn delta_id(&self) -> &DeltaId {
        &self.delta_id
    }

    pub fn base_revision(&self) -> Revision {
        self.base_revision
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Append operations. Nothing is appended if any of them targets a
    /// collection outside the replica's filter.
    pub fn add_operations(&mut self, operations: impl IntoIterator<Item = Operation>) -> Result<&mut Self> {
        let operations: Vec<Operation> = operations.into_iter().collect();
        for op in &operations {
            self.database.check_collection(op.collection_id())?;
        }
        self.operations.extend(operations);
        Ok(self)
    }

    /// Insert each record with all of its fields.
    pub fn insert_records(&mut self, records: impl IntoIterator<Item = Record>) -> Result<&mut Self> {
        self.add_operations(records.into_iter().map(|record| {
            Operation::insert(record.collection_id, record.record_id, record.fields)
        }))
    }

    pub fn delete_records(&mut self, keys: impl IntoIterator<Item = RecordKey>) -> Result<&mut Self> {
        self.add_operations(
            keys.into_iter()
                .map(|key| Operation::delete(key.collection_id, key.record_id)),
        )
    }

    /// Create or replace a record with exactly `fields`.
    pub fn set_fields<I, K, V>(
        &mut self,
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        fields: I,
    ) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<FieldId>,
        V: Into<Value>,
    {
        self.add_operations([Operation::set_fields(collection_id, record_id, fields)])
    }

    /// Overwrite `fields` of an existing record.
    pub fn update_fields<I, K, V>(
        &mut self,
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        fields: I,
    ) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<FieldId>,
        V: Into<Value>,
    {
        self.add_operations([Operation::update_fields(collection_id, record_id, fields)])
    }

    pub fn list_item_set(
        &mut self,
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        field_id: impl Into<FieldId>,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<&mut Self> {
        self.add_operations([Operation::list_item_set(
            collection_id,
            record_id,
            field_id,
            index,
            value,
        )])
    }

    pub fn list_item_insert(
        &mut self,
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        field_id: impl Into<FieldId>,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<&mut Self> {
        self.add_operations([Operation::list_item_insert(
            collection_id,
            record_id,
            field_id,
            index,
            value,
        )])
    }

    pub fn list_item_delete(
        &mut self,
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        field_id: impl Into<FieldId>,
        index: usize,
    ) -> Result<&mut Self> {
        self.add_operations([Operation::list_item_delete(
            collection_id,
            record_id,
            field_id,
            index,
        )])
    }

    pub fn list_item_move(
        &mut self,
        collection_id: impl Into<CollectionId>,
        record_id: impl Into<RecordId>,
        field_id: impl Into<FieldId>,
        index: usize,
        new_index: usize,
    ) -> Result<&mut Self> {
        self.add_operations([Operation::list_item_move(
            collection_id,
            record_id,
            field_id,
            index,
            new_index,
        )])
    }

    /// The delta this transaction submits.
    pub fn to_request(&self) -> DeltaRequest {
        DeltaRequest::new(
            self.delta_id.clone(),
            self.base_revision,
            self.operations.clone(),
        )
    }

    /// Submit the transaction, resolving to the revision it was committed at.
    pub async fn push(&self, policy: Option<ConflictPolicy>) -> Result<Revision> {
        self.database.patch(self.to_request(), policy).await
    }
}
