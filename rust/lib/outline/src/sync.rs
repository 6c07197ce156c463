//! Optimistic sync: apply a reorder locally, write it, confirm or roll back.
//!
//! Each parent key moves through
//!
//! ```text
//! Idle ──apply──▶ Pending ──ok──▶ Confirmed
//!                    │
//!                    └──err──▶ RolledBack (view restored)
//! ```
//!
//! Only one write per parent key may be in flight; a second one is rejected
//! with `ServiceError::Busy`. The write runs on a spawned blocking task that
//! also performs the state transition, so dropping the caller's future does
//! not abort it.
//!
//! Deletes go through [`SyncCoordinator::remove`] too. A delete that must
//! also drop the rows of another coordinator (a module's lessons) takes a
//! [`Cascade`] on that coordinator first: the dependent key stays `Pending`
//! and its rows are removed in the same batch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use lms_core::ServiceError;

use crate::item::{Direction, Reparent};
use crate::sequencer;
use crate::store::{Record, RecordStore, RowKey};

/// Where a parent key is in the write lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Loaded (or never touched); no write issued yet.
    Idle,
    /// A batch write is in flight.
    Pending,
    /// The last write was acknowledged by the store.
    Confirmed,
    /// The last write failed; the view is back at the last confirmed state.
    RolledBack,
}

struct Entry<R> {
    state: SyncState,
    /// What the UI shows. Ahead of `confirmed` while pending.
    view: Vec<R>,
    /// Last state known to be in the store, normalized.
    confirmed: Vec<R>,
    /// Rows exactly as stored; the baseline for deciding what to write.
    stored: Vec<R>,
}

type Entries<R> = Arc<Mutex<HashMap<String, Entry<R>>>>;

fn lock<R>(entries: &Entries<R>) -> MutexGuard<'_, HashMap<String, Entry<R>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records in `next` that differ from their stored version.
fn diff<R: Record>(stored: &[R], next: &[R]) -> Vec<R> {
    let before: HashMap<&str, &R> = stored.iter().map(|r| (r.id(), r)).collect();
    next.iter()
        .filter(|r| before.get(r.id()) != Some(r))
        .cloned()
        .collect()
}

/// Every row of one parent key of another coordinator, held `Pending` and
/// removed together with a write issued elsewhere.
///
/// Settles its key when the write does: emptied and `Confirmed` on success,
/// `RolledBack` on failure. Dropped unused, the key goes back to the state it
/// had before.
pub struct Cascade {
    removals: Vec<RowKey>,
    settle: Option<Box<dyn FnOnce(Option<bool>) + Send>>,
}

impl Cascade {
    /// Number of rows the cascade removes.
    pub fn len(&self) -> usize {
        self.removals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.removals.is_empty()
    }

    fn finish(mut self, written: bool) {
        if let Some(settle) = self.settle.take() {
            settle(Some(written));
        }
    }
}

impl Drop for Cascade {
    fn drop(&mut self) {
        if let Some(settle) = self.settle.take() {
            settle(None);
        }
    }
}

/// Per-parent-key optimistic write coordinator for one record type.
pub struct SyncCoordinator<R: Record> {
    store: Arc<dyn RecordStore<R>>,
    entries: Entries<R>,
}

impl<R: Record> SyncCoordinator<R> {
    pub fn new(store: Arc<dyn RecordStore<R>>) -> Self {
        Self {
            store,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current state of `parent_key`. Unknown keys are `Idle`.
    pub fn state(&self, parent_key: &str) -> SyncState {
        lock(&self.entries)
            .get(parent_key)
            .map_or(SyncState::Idle, |e| e.state)
    }

    /// The optimistic view of `parent_key`, in order. Empty if never loaded.
    pub fn view(&self, parent_key: &str) -> Vec<R> {
        lock(&self.entries)
            .get(parent_key)
            .map(|e| e.view.clone())
            .unwrap_or_default()
    }

    /// Fetch `parent_key` from the store and reset its state to `Idle`.
    ///
    /// Orders are repaired in memory; the repair is written with the next
    /// successful operation on this key.
    pub async fn load(&self, parent_key: &str) -> Result<Vec<R>, ServiceError> {
        self.ensure_not_pending(&[parent_key])?;

        let store = Arc::clone(&self.store);
        let key = parent_key.to_string();
        let stored = tokio::task::spawn_blocking(move || store.fetch_by_parent_key(&key))
            .await
            .map_err(|e| ServiceError::Internal(format!("load task: {}", e)))??;

        let view = sequencer::normalize(&stored);
        let mut entries = lock(&self.entries);
        if entries
            .get(parent_key)
            .is_some_and(|e| e.state == SyncState::Pending)
        {
            return Err(busy(parent_key));
        }
        entries.insert(
            parent_key.to_string(),
            Entry {
                state: SyncState::Idle,
                view: view.clone(),
                confirmed: view.clone(),
                stored,
            },
        );
        debug!("sync: loaded {} record(s) for '{}'", view.len(), parent_key);
        Ok(view)
    }

    /// Move the item at `source_index` to `dest_index` and persist.
    pub async fn reorder(
        &self,
        parent_key: &str,
        source_index: usize,
        dest_index: usize,
    ) -> Result<Vec<R>, ServiceError> {
        self.apply(parent_key, |items| {
            sequencer::reorder(items, source_index, dest_index)
        })
        .await
    }

    /// Move `item_id` one step up or down and persist.
    pub async fn move_item(
        &self,
        parent_key: &str,
        item_id: &str,
        direction: Direction,
    ) -> Result<Vec<R>, ServiceError> {
        self.apply(parent_key, |items| {
            sequencer::move_item(items, item_id, direction)
        })
        .await
    }

    /// Append `record` to its parent key and persist.
    pub async fn insert(&self, mut record: R) -> Result<Vec<R>, ServiceError> {
        let parent_key = record.parent_key().to_string();
        self.apply(&parent_key, move |items| {
            if items.iter().any(|i| i.id() == record.id()) {
                return Err(ServiceError::Validation(format!(
                    "item '{}' already exists",
                    record.id()
                )));
            }
            record.set_order(sequencer::append_order(items));
            let mut next = items.to_vec();
            next.push(record);
            Ok(next)
        })
        .await
    }

    /// Run `op` on the current view of `parent_key` and persist the result.
    ///
    /// Only records that differ from the stored rows are written. If `op`
    /// fails nothing changes.
    pub async fn apply<F>(&self, parent_key: &str, op: F) -> Result<Vec<R>, ServiceError>
    where
        F: FnOnce(&[R]) -> Result<Vec<R>, ServiceError>,
    {
        self.ensure_loaded(parent_key).await?;

        let (next, upserts) = {
            let mut entries = lock(&self.entries);
            let entry = entries
                .get_mut(parent_key)
                .ok_or_else(|| ServiceError::NotFound(format!("'{}' not loaded", parent_key)))?;
            if entry.state == SyncState::Pending {
                return Err(busy(parent_key));
            }
            let next = op(&entry.view)?;
            let upserts = diff(&entry.stored, &next);
            if upserts.is_empty() {
                entry.view = next.clone();
                return Ok(next);
            }
            entry.view = next.clone();
            entry.state = SyncState::Pending;
            (next, upserts)
        };

        self.commit(vec![parent_key.to_string()], upserts, Vec::new(), None)
            .await?;
        Ok(next)
    }

    /// Delete `item_id` from `parent_key` and close the gap, in one batch.
    ///
    /// Rows held by `cascade` are removed in the same batch. Returns the
    /// removed record and the remaining siblings.
    pub async fn remove(
        &self,
        parent_key: &str,
        item_id: &str,
        cascade: Option<Cascade>,
    ) -> Result<(R, Vec<R>), ServiceError> {
        self.ensure_loaded(parent_key).await?;

        let (removed, next, upserts) = {
            let mut entries = lock(&self.entries);
            let entry = entries
                .get_mut(parent_key)
                .ok_or_else(|| ServiceError::NotFound(format!("'{}' not loaded", parent_key)))?;
            if entry.state == SyncState::Pending {
                return Err(busy(parent_key));
            }
            let position = entry
                .view
                .iter()
                .position(|r| r.id() == item_id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "item '{}' not found under '{}'",
                        item_id, parent_key
                    ))
                })?;
            let mut rest = entry.view.clone();
            let removed = rest.remove(position);
            let next = sequencer::normalize(&rest);
            let upserts = diff(&entry.stored, &next);
            entry.view = next.clone();
            entry.state = SyncState::Pending;
            (removed, next, upserts)
        };

        let removals = vec![RowKey::of(&removed)];
        self.commit(vec![parent_key.to_string()], upserts, removals, cascade)
            .await?;
        debug!("sync: removed '{}' from '{}'", item_id, parent_key);
        Ok((removed, next))
    }

    /// Hold every row of `parent_key` for removal by a write on another
    /// coordinator. The key is freshly read and stays `Pending` until the
    /// returned [`Cascade`] settles.
    pub async fn cascade(&self, parent_key: &str) -> Result<Cascade, ServiceError> {
        self.load(parent_key).await?;

        let (removals, prior) = {
            let mut entries = lock(&self.entries);
            let entry = entries
                .get_mut(parent_key)
                .ok_or_else(|| ServiceError::NotFound(format!("'{}' not loaded", parent_key)))?;
            if entry.state == SyncState::Pending {
                return Err(busy(parent_key));
            }
            let prior = entry.state;
            entry.state = SyncState::Pending;
            (entry.stored.iter().map(RowKey::of).collect::<Vec<_>>(), prior)
        };

        let entries = Arc::clone(&self.entries);
        let key = parent_key.to_string();
        let on_settle = move |written: Option<bool>| {
            let mut entries = lock(&entries);
            let Some(entry) = entries.get_mut(&key) else {
                return;
            };
            match written {
                Some(true) => {
                    entry.state = SyncState::Confirmed;
                    entry.view.clear();
                    entry.confirmed.clear();
                    entry.stored.clear();
                }
                Some(false) => {
                    entry.state = SyncState::RolledBack;
                    entry.view = entry.confirmed.clone();
                }
                None => entry.state = prior,
            }
        };
        Ok(Cascade {
            removals,
            settle: Some(Box::new(on_settle)),
        })
    }

    /// Move `item_id` from `from_key` to `to_key` at `dest_index`, writing
    /// both sides and removing the old row in one batch.
    pub async fn transfer(
        &self,
        from_key: &str,
        to_key: &str,
        item_id: &str,
        dest_index: usize,
    ) -> Result<(Vec<R>, Vec<R>), ServiceError>
    where
        R: Reparent,
    {
        self.ensure_loaded(from_key).await?;
        self.ensure_loaded(to_key).await?;

        let (from, to, upserts, removal) = {
            let mut entries = lock(&self.entries);
            for key in [from_key, to_key] {
                match entries.get(key) {
                    Some(e) if e.state == SyncState::Pending => return Err(busy(key)),
                    Some(_) => {}
                    None => return Err(ServiceError::NotFound(format!("'{}' not loaded", key))),
                }
            }

            let source = entries.get(from_key).map(|e| e.view.clone()).unwrap_or_default();
            let dest = entries.get(to_key).map(|e| e.view.clone()).unwrap_or_default();
            let moved_partition = source
                .iter()
                .find(|r| r.id() == item_id)
                .map(|r| r.partition().to_string());
            let (from, to) = sequencer::transfer(&source, &dest, to_key, item_id, dest_index)?;

            let mut upserts = Vec::new();
            let mut removal = Vec::new();
            for (key, next) in [(from_key, &from), (to_key, &to)] {
                if let Some(entry) = entries.get_mut(key) {
                    upserts.extend(diff(&entry.stored, next));
                    entry.view = next.clone();
                    entry.state = SyncState::Pending;
                }
            }
            if let Some(partition) = moved_partition {
                removal.push(RowKey::new(R::TABLE, &partition, item_id));
            }
            (from, to, upserts, removal)
        };

        self.commit(
            vec![from_key.to_string(), to_key.to_string()],
            upserts,
            removal,
            None,
        )
        .await?;
        Ok((from, to))
    }

    async fn ensure_loaded(&self, parent_key: &str) -> Result<(), ServiceError> {
        if lock(&self.entries).contains_key(parent_key) {
            return Ok(());
        }
        self.load(parent_key).await.map(|_| ())
    }

    fn ensure_not_pending(&self, keys: &[&str]) -> Result<(), ServiceError> {
        let entries = lock(&self.entries);
        for key in keys {
            if entries
                .get(*key)
                .is_some_and(|e| e.state == SyncState::Pending)
            {
                return Err(busy(key));
            }
        }
        Ok(())
    }

    /// Write `upserts`/`removals` (plus the cascade's rows) and settle every
    /// key in `keys`.
    async fn commit(
        &self,
        keys: Vec<String>,
        upserts: Vec<R>,
        mut removals: Vec<RowKey>,
        cascade: Option<Cascade>,
    ) -> Result<(), ServiceError> {
        let store = Arc::clone(&self.store);
        let entries = Arc::clone(&self.entries);
        if let Some(cascade) = &cascade {
            removals.extend(cascade.removals.iter().cloned());
        }

        let handle = tokio::task::spawn_blocking(move || {
            let result = store.batch_write(&upserts, &removals);
            settle(&entries, &keys, &result);
            if let Some(cascade) = cascade {
                cascade.finish(result.is_ok());
            }
            if result.is_ok() {
                info!(
                    "sync: confirmed {} record(s) across {:?}",
                    upserts.len() + removals.len(),
                    keys
                );
            }
            result
        });

        handle
            .await
            .map_err(|e| ServiceError::Internal(format!("write task: {}", e)))?
    }
}

fn settle<R: Record>(entries: &Entries<R>, keys: &[String], result: &Result<(), ServiceError>) {
    let mut entries = lock(entries);
    for key in keys {
        let Some(entry) = entries.get_mut(key) else {
            continue;
        };
        match result {
            Ok(()) => {
                entry.state = SyncState::Confirmed;
                entry.confirmed = entry.view.clone();
                entry.stored = entry.view.clone();
            }
            Err(e) => {
                warn!("sync: write for '{}' failed, rolling back: {}", key, e);
                entry.state = SyncState::RolledBack;
                entry.view = entry.confirmed.clone();
            }
        }
    }
}

fn busy(parent_key: &str) -> ServiceError {
    ServiceError::Busy(format!("a write for '{}' is still pending", parent_key))
}
