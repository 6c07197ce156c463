use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use lms_core::ServiceError;

use crate::reconcile::CanonicalItem;

/// CanonicalLoader reads deploy-time navigation overrides. Each role has one
/// TOML file named after it:
///
/// ```text
/// navigation/
/// ├── admin.toml       → role "admin"
/// ├── instructor.toml  → role "instructor"
/// └── student.toml     → role "student"
/// ```
///
/// A file holds the role's top-level items, nested via `children`:
///
/// ```toml
/// [[items]]
/// label = "Courses"
/// path = "/courses"
/// icon = "book"
///
/// [[items.children]]
/// label = "Catalog"
/// path = "/courses/catalog"
/// ```
pub struct CanonicalLoader;

#[derive(Deserialize)]
struct NavigationFile {
    #[serde(default)]
    items: Vec<CanonicalItem>,
}

impl CanonicalLoader {
    /// Load every `<role>.toml` in `dir`. A missing directory yields an empty
    /// map; other files are skipped.
    pub fn load(dir: &Path) -> Result<BTreeMap<String, Vec<CanonicalItem>>, ServiceError> {
        let mut roles = BTreeMap::new();
        if !dir.is_dir() {
            debug!("CanonicalLoader: {:?} does not exist, skipping", dir);
            return Ok(roles);
        }

        let entries = fs::read_dir(dir)
            .map_err(|e| ServiceError::Storage(format!("read {:?}: {}", dir, e)))?;
        for entry in entries {
            let entry = entry.map_err(|e| ServiceError::Storage(e.to_string()))?;
            let path = entry.path();
            if !path.is_file() || !Self::is_toml(&path) {
                continue;
            }
            let Some(role) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!("CanonicalLoader: skipping non-UTF-8 file name {:?}", path);
                continue;
            };
            let items = Self::read_file(&path)?;
            roles.insert(role.to_string(), items);
        }

        debug!("CanonicalLoader: loaded {} role(s) from {:?}", roles.len(), dir);
        Ok(roles)
    }

    /// Load the override for one role. `None` if there is no file for it.
    pub fn load_role(dir: &Path, role: &str) -> Result<Option<Vec<CanonicalItem>>, ServiceError> {
        let path = dir.join(format!("{}.toml", role));
        if !path.is_file() {
            return Ok(None);
        }
        Self::read_file(&path).map(Some)
    }

    fn read_file(path: &Path) -> Result<Vec<CanonicalItem>, ServiceError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ServiceError::Storage(format!("read {:?}: {}", path, e)))?;
        let file: NavigationFile = toml::from_str(&content)
            .map_err(|e| ServiceError::Validation(format!("parse {:?}: {}", path, e)))?;
        debug!("CanonicalLoader: {:?} declares {} top-level item(s)", path, file.items.len());
        Ok(file.items)
    }

    fn is_toml(path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("toml")
    }
}
