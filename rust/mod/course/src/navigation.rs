use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lms_core::ServiceError;
use lms_outline::{
    build, reconcile, sequencer, CanonicalItem, CanonicalLoader, NavRecord, Ordered,
    ReconcileOutcome, RecordStore, RowKey, SyncState, TreeNode,
};

/// Sidebar audience. Each role has its own navigation partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Instructor,
    Student,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Instructor, Role::Student];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Instructor => "instructor",
            Self::Student => "student",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "instructor" => Ok(Self::Instructor),
            "student" => Ok(Self::Student),
            other => Err(ServiceError::Validation(format!("unknown role '{}'", other))),
        }
    }
}

/// Built-in navigation for `role`.
pub fn canonical(role: Role) -> Vec<CanonicalItem> {
    use CanonicalItem as Item;
    match role {
        Role::Admin => vec![
            Item::leaf("Dashboard", "/admin", "home"),
            Item::with_children(
                "Users",
                "/admin/users",
                "users",
                vec![
                    Item::leaf("Instructors", "/admin/users/instructors", ""),
                    Item::leaf("Students", "/admin/users/students", ""),
                ],
            ),
            Item::leaf("Courses", "/admin/courses", "book"),
            Item::leaf("Payments", "/admin/payments", "credit-card"),
            Item::leaf("Settings", "/admin/settings", "settings"),
        ],
        Role::Instructor => vec![
            Item::leaf("Dashboard", "/instructor", "home"),
            Item::with_children(
                "My Courses",
                "/instructor/courses",
                "book",
                vec![
                    Item::leaf("Drafts", "/instructor/courses/drafts", ""),
                    Item::leaf("Published", "/instructor/courses/published", ""),
                ],
            ),
            Item::leaf("Students", "/instructor/students", "users"),
            Item::leaf("Earnings", "/instructor/earnings", "dollar-sign"),
        ],
        Role::Student => vec![
            Item::leaf("Dashboard", "/student", "home"),
            Item::leaf("My Learning", "/student/learning", "play"),
            Item::leaf("Catalog", "/courses", "search"),
            Item::leaf("Certificates", "/student/certificates", "award"),
        ],
    }
}

/// A role's navigation as a tree, with the rows that did not fit.
#[derive(Debug, Clone, Serialize)]
pub struct NavTree {
    pub items: Vec<TreeNode<NavRecord>>,
    /// Ids whose parent is missing. Shown as top-level items.
    pub orphans: Vec<String>,
    /// Ids caught in a parent cycle. The lowest id of each cycle is shown as
    /// a top-level item.
    pub cycles: Vec<String>,
}

impl NavTree {
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty() && self.cycles.is_empty()
    }
}

type States = Mutex<HashMap<Role, SyncState>>;

fn lock(states: &States) -> MutexGuard<'_, HashMap<Role, SyncState>> {
    states.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One in-flight navigation write for a role. Settles the role's state on
/// [`RoleWrite::confirm`], or when dropped: `RolledBack` if the store was
/// written to, the previous state otherwise.
struct RoleWrite<'a> {
    states: &'a States,
    role: Role,
    prior: SyncState,
    writing: bool,
    done: bool,
}

impl RoleWrite<'_> {
    /// The store write is about to start.
    fn writing(&mut self) {
        self.writing = true;
    }

    fn confirm(mut self) {
        self.done = true;
        lock(self.states).insert(self.role, SyncState::Confirmed);
    }
}

impl Drop for RoleWrite<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let state = if self.writing {
            warn!("navigation {}: write failed, nothing persisted", self.role);
            SyncState::RolledBack
        } else {
            self.prior
        };
        lock(self.states).insert(self.role, state);
    }
}

/// Navigation persistence and reconciliation for all roles.
///
/// Writes are serialised per role: while one is in flight, another write for
/// the same role fails with `ServiceError::Busy`.
pub struct NavigationService {
    store: Arc<dyn RecordStore<NavRecord>>,
    /// Directory of `<role>.toml` overrides for the built-in navigation.
    overrides: Option<PathBuf>,
    states: States,
}

impl NavigationService {
    pub fn new(store: Arc<dyn RecordStore<NavRecord>>) -> Self {
        Self {
            store,
            overrides: None,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Write state of `role`. Untouched roles are `Idle`.
    pub fn state(&self, role: Role) -> SyncState {
        lock(&self.states)
            .get(&role)
            .copied()
            .unwrap_or(SyncState::Idle)
    }

    fn begin(&self, role: Role) -> Result<RoleWrite<'_>, ServiceError> {
        let mut states = lock(&self.states);
        let prior = states.get(&role).copied().unwrap_or(SyncState::Idle);
        if prior == SyncState::Pending {
            return Err(ServiceError::Busy(format!(
                "a navigation write for '{}' is still pending",
                role
            )));
        }
        states.insert(role, SyncState::Pending);
        Ok(RoleWrite {
            states: &self.states,
            role,
            prior,
            writing: false,
            done: false,
        })
    }

    pub fn with_overrides(mut self, dir: PathBuf) -> Self {
        self.overrides = Some(dir);
        self
    }

    /// The canonical navigation in effect: the override file if one exists,
    /// else the built-in definition.
    pub fn canonical_for(&self, role: Role) -> Result<Vec<CanonicalItem>, ServiceError> {
        if let Some(dir) = &self.overrides {
            if let Some(items) = CanonicalLoader::load_role(dir, role.as_str())? {
                debug!("navigation: using override for '{}' from {:?}", role, dir);
                return Ok(items);
            }
        }
        Ok(canonical(role))
    }

    /// Reconcile the canonical navigation of `role` with its persisted rows
    /// and write the rows that changed in one batch.
    pub fn sync(&self, role: Role) -> Result<ReconcileOutcome, ServiceError> {
        let canonical = self.canonical_for(role)?;
        let mut write = self.begin(role)?;
        let persisted = self.store.fetch_by_parent_key(role.as_str())?;
        let outcome = reconcile(role.as_str(), &canonical, &persisted)?;

        if !outcome.is_noop() {
            write.writing();
            self.store.batch_upsert(&outcome.changed_records())?;
        }
        write.confirm();
        info!(
            "navigation sync {}: {} inserted, {} deactivated, {} reactivated, {} written",
            role,
            outcome.inserted,
            outcome.deactivated,
            outcome.reactivated,
            outcome.changed.len()
        );
        Ok(outcome)
    }

    /// Sync every role.
    pub fn sync_all(&self) -> Result<Vec<(Role, ReconcileOutcome)>, ServiceError> {
        Role::ALL
            .iter()
            .map(|&role| self.sync(role).map(|outcome| (role, outcome)))
            .collect()
    }

    /// The navigation tree of `role`. Inactive items are always dropped along
    /// with their subtrees; hidden ones unless `include_hidden`. Orphans and
    /// cycle members are reported whether or not they are shown.
    pub fn tree(&self, role: Role, include_hidden: bool) -> Result<NavTree, ServiceError> {
        let records = self.store.fetch_by_parent_key(role.as_str())?;
        let outcome = build(records)?;
        let keep = |r: &NavRecord| r.is_active && (include_hidden || r.is_visible);
        Ok(NavTree {
            items: outcome
                .roots
                .into_iter()
                .filter_map(|node| node.retain(&keep))
                .collect(),
            orphans: outcome.orphans,
            cycles: outcome.cycles,
        })
    }

    /// Show or hide one item. Visibility survives later syncs.
    pub fn set_visibility(
        &self,
        role: Role,
        item_id: &str,
        visible: bool,
    ) -> Result<NavRecord, ServiceError> {
        let mut write = self.begin(role)?;
        let mut record = self
            .store
            .fetch_by_parent_key(role.as_str())?
            .into_iter()
            .find(|r| r.id == item_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("navigation item '{}' for role '{}'", item_id, role))
            })?;
        if record.is_visible != visible {
            record.is_visible = visible;
            write.writing();
            self.store.batch_upsert(std::slice::from_ref(&record))?;
        }
        write.confirm();
        Ok(record)
    }

    /// Reorder the active children of `parent_id` (top-level items when
    /// `None`). Indices count hidden items but not inactive ones, which are
    /// kept after the active siblings. Returns the active siblings in their
    /// new order.
    pub fn reorder(
        &self,
        role: Role,
        parent_id: Option<&str>,
        source_index: usize,
        dest_index: usize,
    ) -> Result<Vec<NavRecord>, ServiceError> {
        let mut write = self.begin(role)?;
        let scope = parent_id.unwrap_or(role.as_str());
        let (active, inactive): (Vec<NavRecord>, Vec<NavRecord>) = self
            .store
            .fetch_by_parent_key(role.as_str())?
            .into_iter()
            .filter(|r| r.parent_key() == scope)
            .partition(|r| r.is_active);

        let moved = sequencer::reorder(&active, source_index, dest_index)?;
        let siblings: Vec<NavRecord> = active.iter().chain(&inactive).cloned().collect();
        let mut next = moved.clone();
        next.extend(sequencer::normalize(&inactive));
        for (position, record) in next.iter_mut().enumerate() {
            record.set_order(position as u32);
        }

        let writes = changed(&siblings, &next);
        if !writes.is_empty() {
            write.writing();
            self.store.batch_upsert(&writes)?;
        }
        write.confirm();
        debug!("navigation {}: reordered '{}', {} row(s) written", role, scope, writes.len());
        Ok(next.into_iter().take(moved.len()).collect())
    }

    /// Delete an item and its whole subtree. Explicit user action only; sync
    /// never deletes.
    ///
    /// The remaining siblings of the item are renumbered in the same write.
    pub fn delete_item(&self, role: Role, item_id: &str) -> Result<usize, ServiceError> {
        let mut write = self.begin(role)?;
        let records = self.store.fetch_by_parent_key(role.as_str())?;
        let target = records.iter().find(|r| r.id == item_id).ok_or_else(|| {
            ServiceError::NotFound(format!("navigation item '{}' for role '{}'", item_id, role))
        })?;
        let scope = target.parent_key().to_string();

        let mut doomed: HashSet<String> = HashSet::from([item_id.to_string()]);
        loop {
            let before = doomed.len();
            for record in &records {
                if record.parent_id.as_ref().is_some_and(|p| doomed.contains(p)) {
                    doomed.insert(record.id.clone());
                }
            }
            if doomed.len() == before {
                break;
            }
        }

        let removals: Vec<RowKey> = records
            .iter()
            .filter(|r| doomed.contains(&r.id))
            .map(RowKey::of)
            .collect();
        let siblings: Vec<NavRecord> = records
            .iter()
            .filter(|r| r.parent_key() == scope && !doomed.contains(&r.id))
            .cloned()
            .collect();
        let upserts = changed(&siblings, &sequencer::normalize(&siblings));

        write.writing();
        self.store.batch_write(&upserts, &removals)?;
        write.confirm();
        info!(
            "navigation {}: deleted '{}' ({} row(s)), {} sibling(s) renumbered",
            role,
            item_id,
            removals.len(),
            upserts.len()
        );
        Ok(removals.len())
    }
}

/// Records of `after` whose order differs from `before`.
fn changed(before: &[NavRecord], after: &[NavRecord]) -> Vec<NavRecord> {
    let ids: HashSet<String> = sequencer::changed_orders(before, after)
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    after.iter().filter(|r| ids.contains(&r.id)).cloned().collect()
}
