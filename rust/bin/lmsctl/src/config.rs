//! Resolve the effective configuration from `--config` plus flag overrides.

use std::path::{Path, PathBuf};

use lms_core::ServiceConfig;

/// Load `config_path` if given (a missing file is an error), then apply
/// `--data-dir` and `--db`.
pub fn resolve(
    config_path: Option<&Path>,
    data_dir: Option<PathBuf>,
    db: Option<PathBuf>,
) -> anyhow::Result<ServiceConfig> {
    let mut config = match config_path {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    if data_dir.is_some() {
        config.data_dir = data_dir;
    }
    if db.is_some() {
        config.db_path = db;
    }
    Ok(config)
}
