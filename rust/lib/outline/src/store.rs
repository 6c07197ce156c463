//! Store boundary for ordered records.
//!
//! Records implement [`Record`] to declare their table and partition;
//! [`RecordStore`] is what the sync layer talks to. [`KvRecordStore`]
//! persists records as JSON in a [`KVStore`] under
//! `"{table}:{partition}:{id}"`, so one prefix scan returns one collection.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use lms_core::ServiceError;
use lms_kv::{KVError, KVStore};

use crate::item::Ordered;

/// Trait implemented by persisted records.
pub trait Record:
    Ordered + Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
    /// Table name, used as the first key segment.
    const TABLE: &'static str;

    /// Store scope: the value `fetch_by_parent_key` selects on.
    fn partition(&self) -> &str;
}

/// Address of one stored row: table, partition and id.
///
/// Removals name their table so one write can also drop rows of another
/// record type sharing the backend (a module's lessons, say).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub table: &'static str,
    pub partition: String,
    pub id: String,
}

impl RowKey {
    pub fn new(table: &'static str, partition: &str, id: &str) -> Self {
        Self {
            table,
            partition: partition.to_string(),
            id: id.to_string(),
        }
    }

    /// Where `record` is stored.
    pub fn of<R: Record>(record: &R) -> Self {
        Self::new(R::TABLE, record.partition(), record.id())
    }
}

/// Remote store for one record type.
pub trait RecordStore<R: Record>: Send + Sync {
    /// All records in one partition, in no particular order.
    fn fetch_by_parent_key(&self, parent_key: &str) -> Result<Vec<R>, ServiceError>;

    /// Upsert `upserts` and remove `removals` in one atomic write. On error
    /// nothing was written.
    fn batch_write(&self, upserts: &[R], removals: &[RowKey]) -> Result<(), ServiceError>;

    /// Atomic upsert of `records`.
    fn batch_upsert(&self, records: &[R]) -> Result<(), ServiceError> {
        self.batch_write(records, &[])
    }

    /// Delete every record of `parent_key` matching `predicate`. Returns the
    /// number deleted. Only for explicit user-initiated deletion.
    fn delete_where(
        &self,
        parent_key: &str,
        predicate: &dyn Fn(&R) -> bool,
    ) -> Result<usize, ServiceError> {
        let doomed: Vec<RowKey> = self
            .fetch_by_parent_key(parent_key)?
            .iter()
            .filter(|r| predicate(r))
            .map(RowKey::of)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        self.batch_write(&[], &doomed)?;
        Ok(doomed.len())
    }
}

/// RecordStore over a KVStore backend.
pub struct KvRecordStore<R: Record> {
    kv: Arc<dyn KVStore>,
    _phantom: PhantomData<R>,
}

impl<R: Record> KvRecordStore<R> {
    pub fn new(kv: Arc<dyn KVStore>) -> Self {
        Self {
            kv,
            _phantom: PhantomData,
        }
    }

    fn prefix(partition: &str) -> String {
        format!("{}:{}:", R::TABLE, partition)
    }

    fn make_key(row: &RowKey) -> String {
        format!("{}:{}:{}", row.table, row.partition, row.id)
    }

    fn kv_err(e: KVError) -> ServiceError {
        ServiceError::Storage(e.to_string())
    }
}

impl<R: Record> RecordStore<R> for KvRecordStore<R> {
    fn fetch_by_parent_key(&self, parent_key: &str) -> Result<Vec<R>, ServiceError> {
        let entries = self
            .kv
            .scan(&Self::prefix(parent_key))
            .map_err(Self::kv_err)?;

        let mut records = Vec::with_capacity(entries.len());
        for (key, bytes) in entries {
            let record: R = serde_json::from_slice(&bytes)
                .map_err(|e| ServiceError::Storage(format!("decode '{}': {}", key, e)))?;
            // A partition containing ':' shares a prefix with its parent.
            if record.partition() == parent_key {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn batch_write(&self, upserts: &[R], removals: &[RowKey]) -> Result<(), ServiceError> {
        if upserts.is_empty() && removals.is_empty() {
            return Ok(());
        }

        let mut entries = Vec::with_capacity(upserts.len());
        for record in upserts {
            let key = Self::make_key(&RowKey::of(record));
            let bytes = serde_json::to_vec(record)
                .map_err(|e| ServiceError::Internal(format!("serialize: {}", e)))?;
            entries.push((key, bytes));
        }
        let removed: Vec<String> = removals.iter().map(Self::make_key).collect();

        let entry_refs: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
            .collect();
        let removed_refs: Vec<&str> = removed.iter().map(String::as_str).collect();

        self.kv
            .batch_write(&entry_refs, &removed_refs)
            .map_err(Self::kv_err)?;

        debug!(
            "{}: wrote {} record(s), removed {}",
            R::TABLE,
            entries.len(),
            removed.len()
        );
        Ok(())
    }
}
