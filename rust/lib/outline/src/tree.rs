//! Tree flattening and building.
//!
//! Trees are never persisted nested. [`flatten`] turns them into flat
//! records carrying `parent_id`, parents before descendants, so a store
//! enforcing parent references can insert in emission order. [`build`]
//! reverses it on every read.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use lms_core::ServiceError;

use crate::item::Ordered;

/// Records that point at a parent record by id.
pub trait Hierarchical: Ordered {
    fn parent_id(&self) -> Option<&str>;
    fn set_parent_id(&mut self, parent_id: Option<String>);
}

/// A flat persisted tree row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub id: String,
    pub parent_key: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub order: u32,
}

impl FlatRecord {
    pub fn new(id: &str, parent_id: Option<&str>, order: u32) -> Self {
        Self {
            id: id.to_string(),
            parent_key: String::new(),
            parent_id: parent_id.map(str::to_string),
            order,
        }
    }
}

impl Ordered for FlatRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_key(&self) -> &str {
        &self.parent_key
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn set_order(&mut self, order: u32) {
        self.order = order;
    }
}

impl Hierarchical for FlatRecord {
    fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn set_parent_id(&mut self, parent_id: Option<String>) {
        self.parent_id = parent_id;
    }
}

/// In-memory tree node. `children` only exist in this form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode<T> {
    #[serde(flatten)]
    pub record: T,
    pub children: Vec<TreeNode<T>>,
}

impl<T: Hierarchical> TreeNode<T> {
    pub fn leaf(record: T) -> Self {
        Self {
            record,
            children: Vec::new(),
        }
    }

    pub fn with_children(record: T, children: Vec<TreeNode<T>>) -> Self {
        Self { record, children }
    }

    pub fn id(&self) -> &str {
        self.record.id()
    }

    /// Number of nodes in this subtree, including self.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(TreeNode::len).sum::<usize>()
    }

    /// Find a node by id in this subtree.
    pub fn find(&self, id: &str) -> Option<&TreeNode<T>> {
        if self.id() == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// Keep only nodes for which `keep` is true; a dropped node drops its subtree.
    pub fn retain<F>(mut self, keep: &F) -> Option<Self>
    where
        F: Fn(&T) -> bool,
    {
        if !keep(&self.record) {
            return None;
        }
        self.children = self
            .children
            .into_iter()
            .filter_map(|c| c.retain(keep))
            .collect();
        Some(self)
    }
}

/// Sort every sibling list by `order`, ties by `id`.
pub fn canonicalize<T: Hierarchical>(nodes: &mut [TreeNode<T>]) {
    nodes.sort_by(|a, b| {
        a.record
            .order()
            .cmp(&b.record.order())
            .then_with(|| a.id().cmp(b.id()))
    });
    for node in nodes.iter_mut() {
        canonicalize(&mut node.children);
    }
}

/// Depth-first pre-order flattening. `parent_id` is rewritten from the
/// traversal, `None` at the roots.
pub fn flatten<T: Hierarchical>(roots: Vec<TreeNode<T>>) -> Vec<T> {
    let mut out = Vec::new();
    for root in roots {
        flatten_into(root, None, &mut out);
    }
    out
}

fn flatten_into<T: Hierarchical>(node: TreeNode<T>, parent: Option<&str>, out: &mut Vec<T>) {
    let TreeNode {
        mut record,
        children,
    } = node;
    record.set_parent_id(parent.map(str::to_string));
    let id = record.id().to_string();
    out.push(record);
    for child in children {
        flatten_into(child, Some(&id), out);
    }
}

/// Result of [`build`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildOutcome<T> {
    pub roots: Vec<TreeNode<T>>,
    /// Records whose `parent_id` named a missing record. Attached as roots.
    pub orphans: Vec<String>,
    /// Records unreachable from any root because of a parent cycle.
    /// The lowest id of each cycle is promoted to a root.
    pub cycles: Vec<String>,
}

impl<T> BuildOutcome<T> {
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty() && self.cycles.is_empty()
    }
}

/// Rebuild the hierarchy from flat records.
///
/// Nothing is dropped: orphans and cycle members end up as extra roots,
/// after the genuine roots, and are reported in the outcome.
pub fn build<T: Hierarchical>(records: Vec<T>) -> Result<BuildOutcome<T>, ServiceError> {
    let mut ids = HashSet::with_capacity(records.len());
    for record in &records {
        if !ids.insert(record.id().to_string()) {
            return Err(ServiceError::Validation(format!(
                "duplicate id '{}' in tree records",
                record.id()
            )));
        }
    }

    let mut roots = Vec::new();
    let mut orphan_roots = Vec::new();
    let mut by_parent: HashMap<String, Vec<T>> = HashMap::new();

    for record in records {
        match record.parent_id().map(str::to_string) {
            None => roots.push(record),
            Some(parent) if ids.contains(&parent) => {
                by_parent.entry(parent).or_default().push(record);
            }
            Some(_) => orphan_roots.push(record),
        }
    }

    let orphans: Vec<String> = orphan_roots.iter().map(|r| r.id().to_string()).collect();
    if !orphans.is_empty() {
        warn!("tree build: {} orphaned record(s): {:?}", orphans.len(), orphans);
    }

    let mut nodes: Vec<TreeNode<T>> = sort_records(roots)
        .into_iter()
        .chain(sort_records(orphan_roots))
        .map(|r| attach(r, &mut by_parent))
        .collect();

    // Whatever is left hangs off a cycle.
    let mut cycles = Vec::new();
    while let Some(id) = by_parent
        .values()
        .flatten()
        .map(|r| r.id().to_string())
        .min()
    {
        let Some(record) = take_record(&mut by_parent, &id) else {
            break;
        };
        cycles.push(id);
        nodes.push(attach(record, &mut by_parent));
    }
    if !cycles.is_empty() {
        warn!("tree build: broke {} parent cycle(s) at {:?}", cycles.len(), cycles);
    }

    Ok(BuildOutcome {
        roots: nodes,
        orphans,
        cycles,
    })
}

fn sort_records<T: Ordered>(mut records: Vec<T>) -> Vec<T> {
    records.sort_by(|a, b| a.order().cmp(&b.order()).then_with(|| a.id().cmp(b.id())));
    records
}

fn attach<T: Hierarchical>(record: T, by_parent: &mut HashMap<String, Vec<T>>) -> TreeNode<T> {
    let children = by_parent.remove(record.id()).unwrap_or_default();
    let children = sort_records(children)
        .into_iter()
        .map(|c| attach(c, by_parent))
        .collect();
    TreeNode::with_children(record, children)
}

fn take_record<T: Ordered>(by_parent: &mut HashMap<String, Vec<T>>, id: &str) -> Option<T> {
    let parent = by_parent
        .iter()
        .find(|(_, group)| group.iter().any(|r| r.id() == id))
        .map(|(parent, _)| parent.clone())?;
    let group = by_parent.get_mut(&parent)?;
    let position = group.iter().position(|r| r.id() == id)?;
    let record = group.remove(position);
    if group.is_empty() {
        by_parent.remove(&parent);
    }
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, parent: Option<&str>, order: u32) -> FlatRecord {
        FlatRecord::new(id, parent, order)
    }

    fn sample_tree() -> Vec<TreeNode<FlatRecord>> {
        vec![
            TreeNode::with_children(
                rec("dash", None, 0),
                vec![
                    TreeNode::leaf(rec("stats", Some("dash"), 0)),
                    TreeNode::with_children(
                        rec("reports", Some("dash"), 1),
                        vec![TreeNode::leaf(rec("sales", Some("reports"), 0))],
                    ),
                ],
            ),
            TreeNode::leaf(rec("courses", None, 1)),
        ]
    }

    #[test]
    fn flatten_is_preorder_with_parent_ids() {
        let flat = flatten(sample_tree());
        let ids: Vec<&str> = flat.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["dash", "stats", "reports", "sales", "courses"]);
        assert_eq!(flat[0].parent_id, None);
        assert_eq!(flat[3].parent_id.as_deref(), Some("reports"));
        assert_eq!(flat[4].parent_id, None);
    }

    #[test]
    fn flatten_rewrites_stale_parent_ids() {
        let tree = vec![TreeNode::with_children(
            rec("a", Some("stale"), 0),
            vec![TreeNode::leaf(rec("b", None, 0))],
        )];
        let flat = flatten(tree);
        assert_eq!(flat[0].parent_id, None);
        assert_eq!(flat[1].parent_id.as_deref(), Some("a"));
    }

    #[test]
    fn build_flatten_round_trip() {
        let tree = sample_tree();
        let mut flat = flatten(tree.clone());
        flat.reverse();
        let outcome = build(flat).unwrap();
        assert!(outcome.is_clean());

        let mut expected = tree;
        canonicalize(&mut expected);
        assert_eq!(outcome.roots, expected);
    }

    #[test]
    fn build_sorts_children_by_order() {
        let flat = vec![
            rec("root", None, 0),
            rec("c", Some("root"), 2),
            rec("a", Some("root"), 0),
            rec("b", Some("root"), 1),
        ];
        let outcome = build(flat).unwrap();
        let children: Vec<&str> = outcome.roots[0].children.iter().map(|c| c.id()).collect();
        assert_eq!(children, vec!["a", "b", "c"]);
    }

    #[test]
    fn build_attaches_orphans_as_roots() {
        let flat = vec![rec("1", None, 0), rec("2", Some("1"), 0), rec("3", Some("99"), 0)];
        let outcome = build(flat).unwrap();

        let roots: Vec<&str> = outcome.roots.iter().map(|n| n.id()).collect();
        assert_eq!(roots, vec!["1", "3"]);
        assert_eq!(outcome.roots[0].children.len(), 1);
        assert_eq!(outcome.roots[0].children[0].id(), "2");
        assert_eq!(outcome.orphans, vec!["3".to_string()]);
        assert!(outcome.cycles.is_empty());
    }

    #[test]
    fn orphan_keeps_its_subtree() {
        let flat = vec![rec("o", Some("gone"), 0), rec("oc", Some("o"), 0)];
        let outcome = build(flat).unwrap();
        assert_eq!(outcome.roots.len(), 1);
        assert_eq!(outcome.roots[0].len(), 2);
        // The record itself is untouched until it is flattened again.
        assert_eq!(outcome.roots[0].record.parent_id.as_deref(), Some("gone"));
    }

    #[test]
    fn build_breaks_cycles_without_dropping() {
        let flat = vec![
            rec("root", None, 0),
            rec("x", Some("y"), 0),
            rec("y", Some("x"), 0),
        ];
        let outcome = build(flat).unwrap();
        assert_eq!(outcome.cycles, vec!["x".to_string()]);
        let total: usize = outcome.roots.iter().map(TreeNode::len).sum();
        assert_eq!(total, 3);
        assert_eq!(outcome.roots[1].id(), "x");
        assert_eq!(outcome.roots[1].children[0].id(), "y");
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let outcome = build(vec![rec("me", Some("me"), 0)]).unwrap();
        assert_eq!(outcome.cycles, vec!["me".to_string()]);
        assert_eq!(outcome.roots.len(), 1);
    }

    #[test]
    fn build_rejects_duplicate_ids() {
        let err = build(vec![rec("a", None, 0), rec("a", None, 1)]).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_FAILED");
    }

    #[test]
    fn find_and_retain() {
        let root = sample_tree().remove(0);
        assert!(root.find("sales").is_some());
        assert!(root.find("courses").is_none());

        let pruned = root.retain(&|r: &FlatRecord| r.id != "reports").unwrap();
        assert_eq!(pruned.len(), 2);
        assert!(pruned.find("sales").is_none());
    }

    #[test]
    fn serializes_children_inline() {
        let node = TreeNode::leaf(rec("a", None, 0));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["id"], "a");
        assert!(json["children"].as_array().unwrap().is_empty());
    }
}
