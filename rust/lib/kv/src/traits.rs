use crate::error::KVError;

/// KVStore is the flat table every ordered collection is persisted in.
///
/// Keys follow a namespaced convention: `modules:{course_id}:{id}`,
/// `navigation_items:{role}:{id}`. A prefix scan over `{table}:{partition}:`
/// returns one collection.
pub trait KVStore: Send + Sync {
    /// Get the value for a key. Returns None if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError>;

    /// Set a single key-value pair.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), KVError>;

    /// Delete a key. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), KVError>;

    /// Write `entries` and delete `removals` in one transaction. Either every
    /// change is visible afterwards or none is.
    fn batch_write(&self, entries: &[(&str, &[u8])], removals: &[&str]) -> Result<(), KVError>;

    /// Write all entries in one transaction.
    fn batch_set(&self, entries: &[(&str, &[u8])]) -> Result<(), KVError> {
        self.batch_write(entries, &[])
    }

    /// Delete all keys in one transaction.
    fn batch_delete(&self, keys: &[&str]) -> Result<(), KVError> {
        self.batch_write(&[], keys)
    }

    /// Scan all keys matching a prefix. Returns sorted (key, value) pairs.
    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KVError>;
}
