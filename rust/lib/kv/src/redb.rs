use std::path::Path;
use std::sync::Arc;

use redb::backends::InMemoryBackend;
use redb::{Database, TableDefinition, WriteTransaction};
use tracing::debug;

use crate::error::KVError;
use crate::traits::KVStore;

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("outline");

fn storage<E: std::fmt::Display>(e: E) -> KVError {
    KVError::Storage(e.to_string())
}

/// RedbStore is a KVStore implementation backed by redb, a pure-Rust embedded
/// key-value database with serializable write transactions. Batch writes run
/// inside one transaction, which is what makes sibling re-sequencing atomic.
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a redb database at the given path.
    pub fn open(path: &Path) -> Result<Self, KVError> {
        let db = Database::create(path).map_err(storage)?;
        debug!("RedbStore: opened {:?}", path);
        Self::init(db)
    }

    /// Create an in-memory database (useful for tests and dry runs).
    pub fn open_in_memory() -> Result<Self, KVError> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(storage)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, KVError> {
        // Ensure the table exists so read transactions never see it missing.
        let write_txn = db.begin_write().map_err(storage)?;
        {
            let _table = write_txn.open_table(TABLE).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Run `apply` inside a single write transaction and commit it.
    /// Dropping the transaction on error aborts every change made so far.
    fn write<F>(&self, apply: F) -> Result<(), KVError>
    where
        F: FnOnce(&WriteTransaction) -> Result<(), KVError>,
    {
        let write_txn = self.db.begin_write().map_err(storage)?;
        if let Err(e) = apply(&write_txn) {
            write_txn.abort().map_err(storage)?;
            return Err(KVError::Aborted(e.to_string()));
        }
        write_txn.commit().map_err(storage)
    }
}

impl KVStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(TABLE).map_err(storage)?;
        let value = table.get(key).map_err(storage)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KVError> {
        self.batch_set(&[(key, value)])
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        self.batch_delete(&[key])
    }

    fn batch_write(&self, entries: &[(&str, &[u8])], removals: &[&str]) -> Result<(), KVError> {
        self.write(|txn| {
            let mut table = txn.open_table(TABLE).map_err(storage)?;
            for (key, value) in entries {
                table.insert(*key, *value).map_err(storage)?;
            }
            for key in removals {
                table.remove(*key).map_err(storage)?;
            }
            Ok(())
        })?;
        debug!(
            "RedbStore: committed {} write(s), {} removal(s)",
            entries.len(),
            removals.len()
        );
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KVError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(TABLE).map_err(storage)?;

        let mut results = Vec::new();
        for entry in table.range(prefix..).map_err(storage)? {
            let (key, value) = entry.map_err(storage)?;
            let key = key.value().to_string();
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key, value.value().to_vec()));
        }

        Ok(results)
    }
}
