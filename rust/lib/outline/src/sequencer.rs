//! Sequencer: dense, zero-based `order` among siblings.
//!
//! Every function here is pure: it takes a sibling slice, returns a new
//! vector, and never touches storage. Writing the result back is the
//! caller's job and must be a single atomic batch, see [`changed_orders`].

use std::collections::{HashMap, HashSet};

use tracing::debug;

use lms_core::ServiceError;

use crate::item::{Direction, Ordered, Reparent};

/// Reject sibling lists that mix parent keys or repeat an id.
pub fn check_siblings<T: Ordered>(siblings: &[T]) -> Result<(), ServiceError> {
    if let Some(first) = siblings.first() {
        let key = first.parent_key();
        if let Some(other) = siblings.iter().find(|s| s.parent_key() != key) {
            return Err(ServiceError::Validation(format!(
                "siblings span more than one parent key: '{}' and '{}'",
                key,
                other.parent_key()
            )));
        }
    }

    let mut seen = HashSet::with_capacity(siblings.len());
    for item in siblings {
        if !seen.insert(item.id()) {
            return Err(ServiceError::Validation(format!(
                "duplicate id '{}' among siblings",
                item.id()
            )));
        }
    }
    Ok(())
}

/// Sort by `order`, ties broken by `id` so the result is deterministic.
fn sorted<T: Ordered + Clone>(siblings: &[T]) -> Vec<T> {
    let mut items = siblings.to_vec();
    items.sort_by(|a, b| a.order().cmp(&b.order()).then_with(|| a.id().cmp(b.id())));
    items
}

fn densify<T: Ordered>(items: &mut [T]) {
    for (position, item) in items.iter_mut().enumerate() {
        item.set_order(position as u32);
    }
}

/// Move the item at `source_index` to `dest_index` and renumber.
///
/// Indices address the siblings in ascending `order`. Out-of-range indices
/// are clamped to the last position rather than rejected.
pub fn reorder<T: Ordered + Clone>(
    siblings: &[T],
    source_index: usize,
    dest_index: usize,
) -> Result<Vec<T>, ServiceError> {
    check_siblings(siblings)?;
    if siblings.is_empty() {
        return Ok(Vec::new());
    }

    let mut items = sorted(siblings);
    let last = items.len() - 1;
    let source = source_index.min(last);
    let dest = dest_index.min(last);

    let moved = items.remove(source);
    items.insert(dest, moved);
    densify(&mut items);

    debug!(
        "reorder: {} siblings, {} -> {} (requested {} -> {})",
        items.len(),
        source,
        dest,
        source_index,
        dest_index
    );
    Ok(items)
}

/// Swap `item_id` with its neighbour in `direction`.
///
/// At a boundary (first item up, last item down) the input is returned
/// unchanged.
pub fn move_item<T: Ordered + Clone>(
    siblings: &[T],
    item_id: &str,
    direction: Direction,
) -> Result<Vec<T>, ServiceError> {
    check_siblings(siblings)?;

    let mut items = sorted(siblings);
    let current = items
        .iter()
        .position(|s| s.id() == item_id)
        .ok_or_else(|| ServiceError::NotFound(format!("item '{}' not found", item_id)))?;

    let target = match direction {
        Direction::Up => current.checked_sub(1),
        Direction::Down => Some(current + 1).filter(|&i| i < items.len()),
    };

    let Some(target) = target else {
        debug!("move_item: '{}' already at boundary, no-op", item_id);
        return Ok(siblings.to_vec());
    };

    items.swap(current, target);
    densify(&mut items);
    Ok(items)
}

/// Repair density after reads: within each parent key, renumber `0..n-1`.
///
/// Groups keep the position of their first appearance in the input.
pub fn normalize<T: Ordered + Clone>(items: &[T]) -> Vec<T> {
    let mut groups: Vec<(String, Vec<T>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for item in items {
        let slot = *index.entry(item.parent_key().to_string()).or_insert_with(|| {
            groups.push((item.parent_key().to_string(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(item.clone());
    }

    let mut out = Vec::with_capacity(items.len());
    for (_, group) in groups {
        let mut group = sorted(&group);
        densify(&mut group);
        out.extend(group);
    }
    out
}

/// The order a newly created sibling gets: after the current maximum.
pub fn append_order<T: Ordered>(siblings: &[T]) -> u32 {
    siblings
        .iter()
        .map(|s| s.order())
        .max()
        .map_or(0, |max| max + 1)
}

/// Move `item_id` from `source` into `dest` (scope `dest_key`) at `dest_index`.
///
/// Both sides come back densely renumbered. `dest_index` is clamped to
/// `dest.len()`, so an oversized index appends.
pub fn transfer<T: Reparent + Clone>(
    source: &[T],
    dest: &[T],
    dest_key: &str,
    item_id: &str,
    dest_index: usize,
) -> Result<(Vec<T>, Vec<T>), ServiceError> {
    check_siblings(source)?;
    check_siblings(dest)?;

    if let Some(other) = dest.iter().find(|d| d.parent_key() != dest_key) {
        return Err(ServiceError::Validation(format!(
            "destination item '{}' belongs to '{}', not '{}'",
            other.id(),
            other.parent_key(),
            dest_key
        )));
    }
    if source.first().is_some_and(|s| s.parent_key() == dest_key) {
        return Err(ServiceError::Validation(format!(
            "source and destination are both '{}'; use reorder",
            dest_key
        )));
    }
    if dest.iter().any(|d| d.id() == item_id) {
        return Err(ServiceError::Validation(format!(
            "item '{}' already present in '{}'",
            item_id, dest_key
        )));
    }

    let mut from = sorted(source);
    let position = from
        .iter()
        .position(|s| s.id() == item_id)
        .ok_or_else(|| ServiceError::NotFound(format!("item '{}' not found", item_id)))?;
    let mut moved = from.remove(position);
    densify(&mut from);

    moved.set_parent_key(dest_key);
    let mut to = sorted(dest);
    let at = dest_index.min(to.len());
    to.insert(at, moved);
    densify(&mut to);

    Ok((from, to))
}

/// The `(id, order)` pairs in `after` that differ from `before`.
///
/// Items absent from `before` are always included.
pub fn changed_orders<T: Ordered>(before: &[T], after: &[T]) -> Vec<(String, u32)> {
    let previous: HashMap<&str, u32> = before.iter().map(|b| (b.id(), b.order())).collect();
    after
        .iter()
        .filter(|a| previous.get(a.id()) != Some(&a.order()))
        .map(|a| (a.id().to_string(), a.order()))
        .collect()
}

/// True when orders are exactly `0..n-1` within every parent key.
pub fn is_dense<T: Ordered>(items: &[T]) -> bool {
    let mut by_key: HashMap<&str, Vec<u32>> = HashMap::new();
    for item in items {
        by_key.entry(item.parent_key()).or_default().push(item.order());
    }
    by_key.into_values().all(|mut orders| {
        orders.sort_unstable();
        orders.iter().enumerate().all(|(i, &o)| o == i as u32)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::OrderedItem;

    fn items(ids: &[&str]) -> Vec<OrderedItem> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| OrderedItem::new(*id, "c1", i as u32))
            .collect()
    }

    fn ids<T: Ordered>(items: &[T]) -> Vec<&str> {
        items.iter().map(|i| i.id()).collect()
    }

    #[test]
    fn reorder_last_to_first() {
        let out = reorder(&items(&["a", "b", "c"]), 2, 0).unwrap();
        assert_eq!(
            out,
            vec![
                OrderedItem::new("c", "c1", 0),
                OrderedItem::new("a", "c1", 1),
                OrderedItem::new("b", "c1", 2),
            ]
        );
    }

    #[test]
    fn reorder_first_to_last() {
        let out = reorder(&items(&["a", "b", "c", "d"]), 0, 3).unwrap();
        assert_eq!(ids(&out), vec!["b", "c", "d", "a"]);
        assert!(is_dense(&out));
    }

    #[test]
    fn reorder_clamps_out_of_range_indices() {
        let out = reorder(&items(&["a", "b", "c"]), 99, 0).unwrap();
        assert_eq!(ids(&out), vec!["c", "a", "b"]);

        let out = reorder(&items(&["a", "b", "c"]), 0, 42).unwrap();
        assert_eq!(ids(&out), vec!["b", "c", "a"]);
    }

    #[test]
    fn reorder_same_index_only_densifies() {
        let sparse = vec![
            OrderedItem::new("a", "c1", 3),
            OrderedItem::new("b", "c1", 10),
        ];
        let out = reorder(&sparse, 1, 1).unwrap();
        assert_eq!(
            out,
            vec![OrderedItem::new("a", "c1", 0), OrderedItem::new("b", "c1", 1)]
        );
    }

    #[test]
    fn reorder_empty_is_empty() {
        let out = reorder::<OrderedItem>(&[], 0, 5).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn reorder_sorts_unsorted_input_first() {
        let shuffled = vec![
            OrderedItem::new("c", "c1", 2),
            OrderedItem::new("a", "c1", 0),
            OrderedItem::new("b", "c1", 1),
        ];
        let out = reorder(&shuffled, 0, 2).unwrap();
        assert_eq!(ids(&out), vec!["b", "c", "a"]);
    }

    #[test]
    fn reorder_rejects_mixed_parent_keys() {
        let mixed = vec![
            OrderedItem::new("a", "c1", 0),
            OrderedItem::new("b", "c2", 1),
        ];
        let err = reorder(&mixed, 0, 1).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_FAILED");
    }

    #[test]
    fn reorder_rejects_duplicate_ids() {
        let dup = vec![
            OrderedItem::new("a", "c1", 0),
            OrderedItem::new("a", "c1", 1),
        ];
        assert!(reorder(&dup, 0, 1).is_err());
    }

    #[test]
    fn reorder_preserves_ids_and_parent_keys() {
        let input = items(&["a", "b", "c", "d", "e"]);
        for source in 0..5 {
            for dest in 0..5 {
                let out = reorder(&input, source, dest).unwrap();
                let mut got: Vec<&str> = ids(&out);
                got.sort_unstable();
                assert_eq!(got, vec!["a", "b", "c", "d", "e"]);
                assert!(out.iter().all(|i| i.parent_key == "c1"));
                assert!(is_dense(&out), "not dense after {} -> {}", source, dest);
            }
        }
    }

    #[test]
    fn move_first_up_is_noop() {
        let input = items(&["a", "b"]);
        let out = move_item(&input, "a", Direction::Up).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn move_last_down_is_noop() {
        let input = items(&["a", "b", "c"]);
        let out = move_item(&input, "c", Direction::Down).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn move_swaps_with_neighbour() {
        let out = move_item(&items(&["a", "b", "c"]), "b", Direction::Up).unwrap();
        assert_eq!(ids(&out), vec!["b", "a", "c"]);
        assert!(is_dense(&out));

        let out = move_item(&items(&["a", "b", "c"]), "b", Direction::Down).unwrap();
        assert_eq!(ids(&out), vec!["a", "c", "b"]);
    }

    #[test]
    fn move_unknown_id_is_not_found() {
        let err = move_item(&items(&["a"]), "zzz", Direction::Down).unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn normalize_repairs_gaps_and_ties_per_group() {
        let messy = vec![
            OrderedItem::new("b", "m1", 5),
            OrderedItem::new("x", "m2", 0),
            OrderedItem::new("a", "m1", 5),
            OrderedItem::new("c", "m1", 0),
            OrderedItem::new("y", "m2", 0),
        ];
        let out = normalize(&messy);
        assert_eq!(
            out,
            vec![
                OrderedItem::new("c", "m1", 0),
                OrderedItem::new("a", "m1", 1),
                OrderedItem::new("b", "m1", 2),
                OrderedItem::new("x", "m2", 0),
                OrderedItem::new("y", "m2", 1),
            ]
        );
        assert!(is_dense(&out));
    }

    #[test]
    fn append_order_after_max() {
        assert_eq!(append_order::<OrderedItem>(&[]), 0);
        let sparse = vec![
            OrderedItem::new("a", "c1", 0),
            OrderedItem::new("b", "c1", 7),
        ];
        assert_eq!(append_order(&sparse), 8);
    }

    #[test]
    fn transfer_moves_and_densifies_both_sides() {
        let m1 = vec![
            OrderedItem::new("l1", "m1", 0),
            OrderedItem::new("l2", "m1", 1),
            OrderedItem::new("l3", "m1", 2),
        ];
        let m2 = vec![
            OrderedItem::new("k1", "m2", 0),
            OrderedItem::new("k2", "m2", 1),
        ];
        let (from, to) = transfer(&m1, &m2, "m2", "l2", 1).unwrap();
        assert_eq!(
            from,
            vec![OrderedItem::new("l1", "m1", 0), OrderedItem::new("l3", "m1", 1)]
        );
        assert_eq!(
            to,
            vec![
                OrderedItem::new("k1", "m2", 0),
                OrderedItem::new("l2", "m2", 1),
                OrderedItem::new("k2", "m2", 2),
            ]
        );
    }

    #[test]
    fn transfer_into_empty_destination_appends() {
        let m1 = vec![OrderedItem::new("l1", "m1", 0)];
        let (from, to) = transfer(&m1, &[], "m9", "l1", 50).unwrap();
        assert!(from.is_empty());
        assert_eq!(to, vec![OrderedItem::new("l1", "m9", 0)]);
    }

    #[test]
    fn transfer_within_same_scope_rejected() {
        let m1 = items(&["a", "b"]);
        let err = transfer(&m1, &[], "c1", "a", 0).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_FAILED");
    }

    #[test]
    fn transfer_unknown_item_is_not_found() {
        let m1 = vec![OrderedItem::new("l1", "m1", 0)];
        let err = transfer(&m1, &[], "m2", "nope", 0).unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn changed_orders_reports_only_differences() {
        let before = items(&["a", "b", "c"]);
        let after = reorder(&before, 0, 1).unwrap();
        let mut changed = changed_orders(&before, &after);
        changed.sort();
        assert_eq!(changed, vec![("a".to_string(), 1), ("b".to_string(), 0)]);

        assert!(changed_orders(&before, &before).is_empty());
    }
}
