//! Navigation reconciliation.
//!
//! The canonical navigation for a role is declared in code (or in a
//! deploy-time file); the persisted copy carries user customization. A
//! reconcile merges the two: canonical wins on content (label, path, icon,
//! nesting), persisted wins on arrangement (order, visibility). Persisted
//! rows are never deleted, only deactivated.
//!
//! Items are matched on the natural key `(label, path)`. Renaming either in
//! the canonical source breaks the match: the old row is deactivated and a
//! new one inserted. This is a known limitation, not something to paper over.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use lms_core::{new_id, ServiceError};

use crate::item::Ordered;
use crate::store::Record;
use crate::tree::{self, Hierarchical};

/// A code-declared navigation entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalItem {
    pub label: String,
    pub path: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CanonicalItem>,
}

impl CanonicalItem {
    /// Create a leaf entry (no children).
    pub fn leaf(label: &str, path: &str, icon: &str) -> Self {
        Self {
            label: label.to_string(),
            path: path.to_string(),
            icon: icon.to_string(),
            children: Vec::new(),
        }
    }

    pub fn with_children(label: &str, path: &str, icon: &str, children: Vec<CanonicalItem>) -> Self {
        Self {
            children,
            ..Self::leaf(label, path, icon)
        }
    }
}

/// A persisted `navigation_items` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavRecord {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub label: String,
    pub path: String,
    #[serde(default)]
    pub icon: String,
    #[serde(rename = "item_order")]
    pub order: u32,
    pub is_visible: bool,
    pub is_active: bool,
}

impl NavRecord {
    fn natural_key(&self) -> (&str, &str) {
        (&self.label, &self.path)
    }
}

impl Ordered for NavRecord {
    fn id(&self) -> &str {
        &self.id
    }

    /// Siblings share a parent item; top-level items share the role.
    fn parent_key(&self) -> &str {
        self.parent_id.as_deref().unwrap_or(&self.role)
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn set_order(&mut self, order: u32) {
        self.order = order;
    }
}

impl Hierarchical for NavRecord {
    fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn set_parent_id(&mut self, parent_id: Option<String>) {
        self.parent_id = parent_id;
    }
}

impl Record for NavRecord {
    const TABLE: &'static str = "navigation_items";

    fn partition(&self) -> &str {
        &self.role
    }
}

/// Result of [`reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    /// The full union, parents before children.
    pub records: Vec<NavRecord>,
    /// Ids of records that differ from what was persisted (or are new).
    pub changed: Vec<String>,
    pub inserted: usize,
    pub matched: usize,
    pub deactivated: usize,
    pub reactivated: usize,
    pub reparented: usize,
}

impl ReconcileOutcome {
    /// True when writing `records` back would change nothing.
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }

    /// The records that need to be written.
    pub fn changed_records(&self) -> Vec<NavRecord> {
        let changed: HashSet<&str> = self.changed.iter().map(String::as_str).collect();
        self.records
            .iter()
            .filter(|r| changed.contains(r.id.as_str()))
            .cloned()
            .collect()
    }
}

struct Merge<'a> {
    role: &'a str,
    records: Vec<NavRecord>,
    /// Natural key -> indices into `records` of persisted rows not yet matched.
    candidates: HashMap<(String, String), Vec<usize>>,
    matched: Vec<bool>,
    /// Indices that need an appended order in their (possibly new) scope.
    needs_order: Vec<usize>,
    outcome: ReconcileOutcome,
}

impl Merge<'_> {
    fn walk(&mut self, items: &[CanonicalItem], parent: Option<&str>) {
        for item in items {
            let index = self.merge_one(item, parent);
            let id = self.records[index].id.clone();
            self.walk(&item.children, Some(&id));
        }
    }

    fn merge_one(&mut self, item: &CanonicalItem, parent: Option<&str>) -> usize {
        let key = (item.label.clone(), item.path.clone());
        let records = &self.records;
        let picked = self.candidates.get_mut(&key).and_then(|indices| {
            // Prefer a row already under this parent so duplicates stay put.
            let at = indices
                .iter()
                .position(|&i| records[i].parent_id.as_deref() == parent)
                .unwrap_or(0);
            (!indices.is_empty()).then(|| indices.remove(at))
        });

        match picked {
            Some(index) => {
                self.matched[index] = true;
                self.outcome.matched += 1;

                let record = &mut self.records[index];
                record.label = item.label.clone();
                record.path = item.path.clone();
                record.icon = item.icon.clone();
                if !record.is_active {
                    record.is_active = true;
                    self.outcome.reactivated += 1;
                }
                if record.parent_id.as_deref() != parent {
                    record.parent_id = parent.map(str::to_string);
                    self.needs_order.push(index);
                    self.outcome.reparented += 1;
                }
                index
            }
            None => {
                self.records.push(NavRecord {
                    id: new_id(),
                    role: self.role.to_string(),
                    parent_id: parent.map(str::to_string),
                    label: item.label.clone(),
                    path: item.path.clone(),
                    icon: item.icon.clone(),
                    order: 0,
                    is_visible: true,
                    is_active: true,
                });
                self.outcome.inserted += 1;
                let index = self.records.len() - 1;
                self.needs_order.push(index);
                index
            }
        }
    }

    /// Append new and reparented rows after the current maximum of their scope.
    fn assign_orders(&mut self) {
        let pending: HashSet<usize> = self.needs_order.iter().copied().collect();
        let mut next: HashMap<String, u32> = HashMap::new();
        for (i, record) in self.records.iter().enumerate() {
            if pending.contains(&i) {
                continue;
            }
            let slot = next.entry(record.parent_key().to_string()).or_insert(0);
            *slot = (*slot).max(record.order + 1);
        }

        for &i in &self.needs_order {
            let key = self.records[i].parent_key().to_string();
            let slot = next.entry(key).or_insert(0);
            self.records[i].order = *slot;
            *slot += 1;
        }
    }
}

/// Merge `canonical` into the `persisted` rows of `role`.
///
/// Every persisted row survives in the output. Running it again on its own
/// output with the same canonical input changes nothing.
pub fn reconcile(
    role: &str,
    canonical: &[CanonicalItem],
    persisted: &[NavRecord],
) -> Result<ReconcileOutcome, ServiceError> {
    if let Some(other) = persisted.iter().find(|r| r.role != role) {
        return Err(ServiceError::Validation(format!(
            "navigation item '{}' belongs to role '{}', not '{}'",
            other.id, other.role, role
        )));
    }

    let mut sorted: Vec<NavRecord> = persisted.to_vec();
    sorted.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

    let mut candidates: HashMap<(String, String), Vec<usize>> = HashMap::new();
    for (i, record) in sorted.iter().enumerate() {
        let (label, path) = record.natural_key();
        candidates
            .entry((label.to_string(), path.to_string()))
            .or_default()
            .push(i);
    }

    let mut merge = Merge {
        role,
        matched: vec![false; sorted.len()],
        records: sorted,
        candidates,
        needs_order: Vec::new(),
        outcome: ReconcileOutcome::default(),
    };
    merge.walk(canonical, None);

    for (record, &matched) in merge.records.iter_mut().zip(&merge.matched) {
        if !matched && record.is_active {
            record.is_active = false;
            merge.outcome.deactivated += 1;
        }
    }
    merge.assign_orders();

    let Merge {
        records,
        mut outcome,
        ..
    } = merge;

    // Emit parents before children without touching any record's fields.
    let sequence: Vec<String> = tree::flatten(tree::build(records.clone())?.roots)
        .into_iter()
        .map(|r| r.id)
        .collect();
    let mut by_id: HashMap<String, NavRecord> =
        records.into_iter().map(|r| (r.id.clone(), r)).collect();
    outcome.records = sequence
        .iter()
        .filter_map(|id| by_id.remove(id))
        .collect();

    let before: HashMap<&str, &NavRecord> = persisted.iter().map(|r| (r.id.as_str(), r)).collect();
    outcome.changed = outcome
        .records
        .iter()
        .filter(|r| before.get(r.id.as_str()) != Some(r))
        .map(|r| r.id.clone())
        .collect();

    debug!(
        "reconcile {}: {} records, {} inserted, {} matched, {} deactivated, {} changed",
        role,
        outcome.records.len(),
        outcome.inserted,
        outcome.matched,
        outcome.deactivated,
        outcome.changed.len()
    );
    Ok(outcome)
}
