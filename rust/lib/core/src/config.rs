use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ServiceError;

/// Storage and canonical-definition locations shared by the library and CLI.
///
/// Loaded from a TOML file; every field is optional and falls back to a
/// path under `data_dir`.
///
/// ```toml
/// data_dir = "/var/lib/lms"
/// db_path = "/var/lib/lms/outline.redb"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Root data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Path to the redb database file.
    /// Defaults to `{data_dir}/data.redb` if not specified.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Directory holding deploy-time canonical navigation (`<role>.toml`).
    /// Defaults to `{data_dir}/navigation` if not specified.
    #[serde(default)]
    pub navigation_dir: Option<PathBuf>,
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::Internal(format!("read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ServiceError> {
        toml::from_str(content)
            .map_err(|e| ServiceError::Validation(format!("invalid config: {}", e)))
    }

    /// Resolve the redb database path, falling back to `{data_dir}/data.redb`.
    pub fn resolve_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.resolve_data_subpath("data.redb"))
    }

    /// Resolve the canonical navigation directory.
    pub fn resolve_navigation_dir(&self) -> PathBuf {
        self.navigation_dir
            .clone()
            .unwrap_or_else(|| self.resolve_data_subpath("navigation"))
    }

    fn resolve_data_subpath(&self, name: &str) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(|d| d.join(name))
            .unwrap_or_else(|| PathBuf::from(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml() {
        let config = ServiceConfig::from_toml(
            r#"
            data_dir = "/tmp/lms"
            db_path = "/srv/outline.redb"
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/lms")));
        assert_eq!(config.resolve_db_path(), PathBuf::from("/srv/outline.redb"));
    }

    #[test]
    fn test_resolve_defaults() {
        let config = ServiceConfig {
            data_dir: Some(PathBuf::from("/data")),
            ..Default::default()
        };
        assert_eq!(config.resolve_db_path(), PathBuf::from("/data/data.redb"));
        assert_eq!(
            config.resolve_navigation_dir(),
            PathBuf::from("/data/navigation")
        );
    }

    #[test]
    fn test_no_data_dir_uses_relative_paths() {
        let config = ServiceConfig::default();
        assert_eq!(config.resolve_db_path(), PathBuf::from("data.redb"));
    }

    #[test]
    fn test_invalid_toml_is_validation_error() {
        let err = ServiceConfig::from_toml("data_dir = [").unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_FAILED");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lms.toml");
        std::fs::write(&path, "navigation_dir = \"/etc/lms/nav\"\n").unwrap();
        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(
            config.resolve_navigation_dir(),
            PathBuf::from("/etc/lms/nav")
        );
    }
}
