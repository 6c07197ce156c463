//! Ordered hierarchical collections.
//!
//! Keeps course modules, lessons and role navigation trees consistent when
//! they are persisted in a flat key-value table:
//!
//! - [`sequencer`] assigns dense, zero-based `order` values among siblings.
//! - [`tree`] converts between nested trees and flat `parent_id` records.
//! - [`reconcile`] merges code-declared navigation with user-customized rows.
//! - [`store`] is the persistence boundary ([`RecordStore`]).
//! - [`sync`] serialises optimistic writes per parent key.
//!
//! Everything except [`store`] and [`sync`] is pure and performs no I/O.

pub mod canonical;
pub mod item;
pub mod reconcile;
pub mod sequencer;
pub mod store;
pub mod sync;
pub mod tree;

pub use canonical::CanonicalLoader;
pub use item::{Direction, OrderedItem, Ordered, Reparent};
pub use reconcile::{reconcile, CanonicalItem, NavRecord, ReconcileOutcome};
pub use store::{KvRecordStore, Record, RecordStore, RowKey};
pub use sync::{Cascade, SyncCoordinator, SyncState};
pub use tree::{build, flatten, BuildOutcome, FlatRecord, Hierarchical, TreeNode};
