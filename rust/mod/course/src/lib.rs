pub mod model;
pub mod navigation;
pub mod structure;

use std::path::PathBuf;
use std::sync::Arc;

use lms_kv::KVStore;
use lms_outline::{KvRecordStore, NavRecord, RecordStore};

pub use model::{Lesson, Module};
pub use navigation::{canonical, NavTree, NavigationService, Role};
pub use structure::{CourseService, ModuleOutline};

/// The course module: course outlines and role navigation.
///
/// Wires a record store per table over one KV backend, so every table shares
/// the same database file and transaction engine.
pub struct CourseModule {
    navigation: NavigationService,
    courses: CourseService,
}

impl CourseModule {
    pub fn new(kv: Arc<dyn KVStore>) -> Self {
        let modules: Arc<dyn RecordStore<Module>> = Arc::new(KvRecordStore::new(Arc::clone(&kv)));
        let lessons: Arc<dyn RecordStore<Lesson>> = Arc::new(KvRecordStore::new(Arc::clone(&kv)));
        let navigation: Arc<dyn RecordStore<NavRecord>> = Arc::new(KvRecordStore::new(kv));

        Self {
            navigation: NavigationService::new(navigation),
            courses: CourseService::new(modules, lessons),
        }
    }

    /// Read `<role>.toml` navigation overrides from `dir`.
    pub fn with_navigation_overrides(mut self, dir: PathBuf) -> Self {
        self.navigation = self.navigation.with_overrides(dir);
        self
    }

    pub fn navigation(&self) -> &NavigationService {
        &self.navigation
    }

    pub fn courses(&self) -> &CourseService {
        &self.courses
    }
}
