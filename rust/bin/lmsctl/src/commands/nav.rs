//! `lmsctl nav ...`: navigation sync and inspection.

use anyhow::Result;

use course::{CourseModule, Role};
use lms_outline::{NavRecord, ReconcileOutcome, TreeNode};

use super::print_json;

pub fn sync(course: &CourseModule, role: Option<Role>, json: bool) -> Result<()> {
    let outcomes = match role {
        Some(role) => vec![(role, course.navigation().sync(role)?)],
        None => course.navigation().sync_all()?,
    };

    if json {
        let body: Vec<serde_json::Value> = outcomes
            .iter()
            .map(|(role, outcome)| summary(*role, outcome))
            .collect();
        return print_json(&body);
    }

    for (role, outcome) in &outcomes {
        if outcome.is_noop() {
            println!("{}: up to date ({} items)", role, outcome.records.len());
        } else {
            println!(
                "{}: {} inserted, {} deactivated, {} reactivated, {} reparented, {} written",
                role,
                outcome.inserted,
                outcome.deactivated,
                outcome.reactivated,
                outcome.reparented,
                outcome.changed.len()
            );
        }
    }
    Ok(())
}

fn summary(role: Role, outcome: &ReconcileOutcome) -> serde_json::Value {
    serde_json::json!({
        "role": role,
        "items": outcome.records.len(),
        "inserted": outcome.inserted,
        "matched": outcome.matched,
        "deactivated": outcome.deactivated,
        "reactivated": outcome.reactivated,
        "reparented": outcome.reparented,
        "written": outcome.changed.len(),
    })
}

pub fn show(course: &CourseModule, role: Role, include_hidden: bool, json: bool) -> Result<()> {
    let tree = course.navigation().tree(role, include_hidden)?;
    if json {
        return print_json(&tree);
    }
    if tree.items.is_empty() && tree.is_clean() {
        println!("No navigation for {}. Run `lmsctl nav sync --role {}`.", role, role);
        return Ok(());
    }
    for node in &tree.items {
        print_node(node, 0);
    }
    if !tree.orphans.is_empty() {
        println!(
            "\n{} orphaned item(s) shown at top level (parent missing): {}",
            tree.orphans.len(),
            tree.orphans.join(", ")
        );
    }
    if !tree.cycles.is_empty() {
        println!(
            "\n{} item(s) in a parent cycle: {}",
            tree.cycles.len(),
            tree.cycles.join(", ")
        );
    }
    Ok(())
}

fn print_node(node: &TreeNode<NavRecord>, depth: usize) {
    let record = &node.record;
    let hidden = if record.is_visible { "" } else { "  (hidden)" };
    println!(
        "{:indent$}{:<3} {:<24} {:<36} {}{}",
        "",
        record.order,
        record.label,
        record.path,
        record.id,
        hidden,
        indent = depth * 2
    );
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

pub fn set_visibility(course: &CourseModule, role: Role, id: &str, visible: bool) -> Result<()> {
    let record = course.navigation().set_visibility(role, id, visible)?;
    let state = if record.is_visible { "visible" } else { "hidden" };
    println!("{} '{}' is now {}.", role, record.label, state);
    Ok(())
}

pub fn reorder(
    course: &CourseModule,
    role: Role,
    parent: Option<&str>,
    from: usize,
    to: usize,
    json: bool,
) -> Result<()> {
    let siblings = course.navigation().reorder(role, parent, from, to)?;
    if json {
        return print_json(&siblings);
    }
    for record in &siblings {
        println!("{:<3} {:<24} {}", record.order, record.label, record.id);
    }
    Ok(())
}

pub fn delete(course: &CourseModule, role: Role, id: &str) -> Result<()> {
    let deleted = course.navigation().delete_item(role, id)?;
    println!("Deleted {} navigation item(s).", deleted);
    Ok(())
}
