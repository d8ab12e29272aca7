//! Snapshot types for persisting and restoring dataset state.
//!
//! Snapshots are the bridge between the in-memory [`Dataset`] and the local
//! cache. They are designed for deterministic serialization, so the same
//! dataset always produces byte-identical JSON.

use crate::{
    delta::HistoryEntry, error::Result, CollectionId, Dataset, Error, Record, RecordId, Revision,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of a dataset.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Dataset revision
    pub revision: Revision,
    /// Revision at which the retained history starts
    pub history_origin: Revision,
    /// Active collection filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_filter: Option<CollectionId>,
    /// All records organized by collection, then by record ID
    pub records: BTreeMap<CollectionId, BTreeMap<RecordId, Record>>,
    /// Applied delta summaries, oldest first
    pub revision_history: Vec<HistoryEntry>,
}

impl DatasetSnapshot {
    /// Count total records across all collections.
    pub fn record_count(&self) -> usize {
        self.records.values().map(|c| c.len()).sum()
    }

    /// Check the structural invariants a restored dataset relies on.
    pub fn validate(&self) -> Result<()> {
        for (collection_id, records) in &self.records {
            if let Some(filter) = &self.collection_filter {
                if filter != collection_id {
                    return Err(Error::InvalidSnapshot(format!(
                        "collection '{}' outside filter '{}'",
                        collection_id, filter
                    )));
                }
            }
            for (record_id, record) in records {
                if &record.collection_id != collection_id || &record.record_id != record_id {
                    return Err(Error::InvalidSnapshot(format!(
                        "record {} indexed under {}/{}",
                        record.key(),
                        collection_id,
                        record_id
                    )));
                }
            }
        }

        let mut expected_base = self.history_origin;
        for entry in &self.revision_history {
            if entry.base_revision < expected_base || entry.revision <= entry.base_revision {
                return Err(Error::InvalidSnapshot(format!(
                    "revision history out of order at base revision {}",
                    entry.base_revision
                )));
            }
            expected_base = entry.revision;
        }
        if expected_base > self.revision {
            return Err(Error::InvalidSnapshot(format!(
                "history reaches revision {} beyond dataset revision {}",
                expected_base, self.revision
            )));
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        // Validate format version
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        snapshot.validate()?;
        Ok(snapshot)
    }
}

impl Dataset {
    /// Export the current dataset state as a snapshot.
    pub fn export_snapshot(&self) -> DatasetSnapshot {
        let mut records: BTreeMap<CollectionId, BTreeMap<RecordId, Record>> = BTreeMap::new();
        for record in self.iter() {
            records
                .entry(record.collection_id.clone())
                .or_default()
                .insert(record.record_id.clone(), record.clone());
        }

        DatasetSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            revision: self.revision(),
            history_origin: self.history_origin(),
            collection_filter: self.collection_filter().cloned(),
            records,
            revision_history: self.revision_history().to_vec(),
        }
    }

    /// Restore a dataset from a snapshot.
    pub fn from_snapshot(snapshot: DatasetSnapshot) -> Result<Self> {
        snapshot.validate()?;
        let DatasetSnapshot {
            revision,
            history_origin,
            collection_filter,
            records,
            revision_history,
            ..
        } = snapshot;

        Ok(Dataset::from_parts(
            revision,
            records.into_values().flat_map(BTreeMap::into_values),
            revision_history,
            history_origin,
            collection_filter,
        ))
    }
}
