use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use lms_core::ServiceError;
use lms_outline::{Direction, RecordStore, SyncCoordinator, SyncState};

use crate::model::{Lesson, Module};

/// A module with its lessons, both in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleOutline {
    #[serde(flatten)]
    pub module: Module,
    pub lessons: Vec<Lesson>,
}

/// Course structure operations. Every write goes through a
/// [`SyncCoordinator`], so concurrent edits of one course (or one module)
/// are serialised and a failed write rolls the view back.
pub struct CourseService {
    modules: SyncCoordinator<Module>,
    lessons: SyncCoordinator<Lesson>,
}

impl CourseService {
    pub fn new(
        module_store: Arc<dyn RecordStore<Module>>,
        lesson_store: Arc<dyn RecordStore<Lesson>>,
    ) -> Self {
        Self {
            modules: SyncCoordinator::new(module_store),
            lessons: SyncCoordinator::new(lesson_store),
        }
    }

    /// Modules of a course, in order, freshly read.
    pub async fn modules(&self, course_id: &str) -> Result<Vec<Module>, ServiceError> {
        self.modules.load(course_id).await
    }

    /// Lessons of a module, in order, freshly read.
    pub async fn lessons(&self, module_id: &str) -> Result<Vec<Lesson>, ServiceError> {
        self.lessons.load(module_id).await
    }

    /// The whole outline of a course.
    pub async fn structure(&self, course_id: &str) -> Result<Vec<ModuleOutline>, ServiceError> {
        let modules = self.modules(course_id).await?;
        let mut outline = Vec::with_capacity(modules.len());
        for module in modules {
            let lessons = self.lessons(&module.id).await?;
            outline.push(ModuleOutline { module, lessons });
        }
        Ok(outline)
    }

    /// Append a new module to the end of a course.
    pub async fn add_module(&self, course_id: &str, title: &str) -> Result<Module, ServiceError> {
        let module = Module::new(course_id, title);
        let id = module.id.clone();
        let view = self.modules.insert(module).await?;
        take(view, &id, "module")
    }

    /// Append a new lesson to the end of a module.
    pub async fn add_lesson(&self, module_id: &str, title: &str) -> Result<Lesson, ServiceError> {
        let lesson = Lesson::new(module_id, title);
        let id = lesson.id.clone();
        let view = self.lessons.insert(lesson).await?;
        take(view, &id, "lesson")
    }

    pub async fn reorder_modules(
        &self,
        course_id: &str,
        source_index: usize,
        dest_index: usize,
    ) -> Result<Vec<Module>, ServiceError> {
        self.modules.reorder(course_id, source_index, dest_index).await
    }

    pub async fn move_module(
        &self,
        course_id: &str,
        module_id: &str,
        direction: Direction,
    ) -> Result<Vec<Module>, ServiceError> {
        self.modules.move_item(course_id, module_id, direction).await
    }

    pub async fn reorder_lessons(
        &self,
        module_id: &str,
        source_index: usize,
        dest_index: usize,
    ) -> Result<Vec<Lesson>, ServiceError> {
        self.lessons.reorder(module_id, source_index, dest_index).await
    }

    pub async fn move_lesson(
        &self,
        module_id: &str,
        lesson_id: &str,
        direction: Direction,
    ) -> Result<Vec<Lesson>, ServiceError> {
        self.lessons.move_item(module_id, lesson_id, direction).await
    }

    /// Move a lesson to another module, at `dest_index` or at the end.
    /// Returns the moved lesson.
    pub async fn transfer_lesson(
        &self,
        lesson_id: &str,
        from_module: &str,
        to_module: &str,
        dest_index: Option<usize>,
    ) -> Result<Lesson, ServiceError> {
        let (_, dest) = self
            .lessons
            .transfer(from_module, to_module, lesson_id, dest_index.unwrap_or(usize::MAX))
            .await?;
        info!("lesson {} moved from {} to {}", lesson_id, from_module, to_module);
        take(dest, lesson_id, "lesson")
    }

    /// Delete a module and all of its lessons, closing the gap in the course
    /// order. One write: the lessons stay locked until it settles.
    pub async fn delete_module(&self, course_id: &str, module_id: &str) -> Result<usize, ServiceError> {
        let lessons = self.lessons.cascade(module_id).await?;
        let lessons_deleted = lessons.len();
        self.modules
            .remove(course_id, module_id, Some(lessons))
            .await
            .map_err(|e| not_found(e, "module", module_id, course_id))?;
        info!(
            "module {} deleted from course {} with {} lesson(s)",
            module_id, course_id, lessons_deleted
        );
        Ok(lessons_deleted)
    }

    /// Delete one lesson and close the gap in the module order.
    pub async fn delete_lesson(&self, module_id: &str, lesson_id: &str) -> Result<(), ServiceError> {
        self.lessons
            .remove(module_id, lesson_id, None)
            .await
            .map_err(|e| not_found(e, "lesson", lesson_id, module_id))?;
        Ok(())
    }

    /// Write state of a course's module list.
    pub fn module_state(&self, course_id: &str) -> SyncState {
        self.modules.state(course_id)
    }

    /// Write state of a module's lesson list.
    pub fn lesson_state(&self, module_id: &str) -> SyncState {
        self.lessons.state(module_id)
    }
}

fn not_found(e: ServiceError, kind: &str, id: &str, parent: &str) -> ServiceError {
    match e {
        ServiceError::NotFound(_) => {
            ServiceError::NotFound(format!("{} '{}' in '{}'", kind, id, parent))
        }
        other => other,
    }
}

fn take<R: lms_outline::Ordered>(view: Vec<R>, id: &str, kind: &str) -> Result<R, ServiceError> {
    view.into_iter()
        .find(|r| r.id() == id)
        .ok_or_else(|| ServiceError::Internal(format!("{} '{}' missing after write", kind, id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Mutex;

    use lms_kv::{KVStore, RedbStore};
    use lms_outline::{sequencer, KvRecordStore, Record, RowKey};

    struct Fixture {
        service: CourseService,
        modules: Arc<KvRecordStore<Module>>,
        lessons: Arc<KvRecordStore<Lesson>>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn KVStore> =
            Arc::new(RedbStore::open(&dir.path().join("course.redb")).unwrap());
        let modules = Arc::new(KvRecordStore::<Module>::new(Arc::clone(&kv)));
        let lessons = Arc::new(KvRecordStore::<Lesson>::new(kv));
        let service = CourseService::new(
            Arc::clone(&modules) as Arc<dyn RecordStore<Module>>,
            Arc::clone(&lessons) as Arc<dyn RecordStore<Lesson>>,
        );
        Fixture {
            service,
            modules,
            lessons,
            _dir: dir,
        }
    }

    fn module_titles(modules: &[Module]) -> Vec<&str> {
        modules.iter().map(|m| m.title.as_str()).collect()
    }

    fn lesson_titles(lessons: &[Lesson]) -> Vec<&str> {
        lessons.iter().map(|l| l.title.as_str()).collect()
    }

    fn stored_modules(store: &KvRecordStore<Module>, course: &str) -> Vec<Module> {
        let mut rows = store.fetch_by_parent_key(course).unwrap();
        rows.sort_by_key(|m| m.module_order);
        rows
    }

    fn stored_lessons(store: &KvRecordStore<Lesson>, module: &str) -> Vec<Lesson> {
        let mut rows = store.fetch_by_parent_key(module).unwrap();
        rows.sort_by_key(|l| l.lesson_order);
        rows
    }

    async fn seed_course(service: &CourseService) -> Vec<Module> {
        for title in ["Intro", "Basics", "Advanced"] {
            service.add_module("c1", title).await.unwrap();
        }
        service.modules("c1").await.unwrap()
    }

    #[tokio::test]
    async fn add_module_appends() {
        let f = fixture();
        let modules = seed_course(&f.service).await;
        assert_eq!(
            module_titles(&modules),
            vec!["Intro", "Basics", "Advanced"]
        );
        assert!(sequencer::is_dense(&modules));
        assert_eq!(stored_modules(&f.modules, "c1"), modules);
    }

    #[tokio::test]
    async fn reorder_and_move_modules() {
        let f = fixture();
        seed_course(&f.service).await;

        let view = f.service.reorder_modules("c1", 2, 0).await.unwrap();
        assert_eq!(
            module_titles(&view),
            vec!["Advanced", "Intro", "Basics"]
        );

        let intro = view[1].id.clone();
        let view = f.service.move_module("c1", &intro, Direction::Up).await.unwrap();
        assert_eq!(
            module_titles(&view),
            vec!["Intro", "Advanced", "Basics"]
        );
        assert_eq!(stored_modules(&f.modules, "c1"), view);
    }

    #[tokio::test]
    async fn lessons_reorder_within_module() {
        let f = fixture();
        let module = f.service.add_module("c1", "Intro").await.unwrap();
        for title in ["Welcome", "Setup", "Tour"] {
            f.service.add_lesson(&module.id, title).await.unwrap();
        }

        let view = f.service.reorder_lessons(&module.id, 0, 2).await.unwrap();
        assert_eq!(
            lesson_titles(&view),
            vec!["Setup", "Tour", "Welcome"]
        );
        let tour = view[1].id.clone();
        let view = f
            .service
            .move_lesson(&module.id, &tour, Direction::Down)
            .await
            .unwrap();
        assert_eq!(
            lesson_titles(&view),
            vec!["Setup", "Welcome", "Tour"]
        );
        assert_eq!(stored_lessons(&f.lessons, &module.id), view);
    }

    #[tokio::test]
    async fn transfer_lesson_between_modules() {
        let f = fixture();
        let modules = seed_course(&f.service).await;
        let (a, b) = (&modules[0].id, &modules[1].id);
        let l1 = f.service.add_lesson(a, "One").await.unwrap();
        f.service.add_lesson(a, "Two").await.unwrap();
        f.service.add_lesson(b, "Three").await.unwrap();

        let moved = f.service.transfer_lesson(&l1.id, a, b, Some(0)).await.unwrap();
        assert_eq!(moved.module_id, *b);
        assert_eq!(moved.lesson_order, 0);

        let left = stored_lessons(&f.lessons, a);
        assert_eq!(lesson_titles(&left), vec!["Two"]);
        assert_eq!(left[0].lesson_order, 0);
        let right = stored_lessons(&f.lessons, b);
        assert_eq!(lesson_titles(&right), vec!["One", "Three"]);
    }

    #[tokio::test]
    async fn transfer_without_index_appends() {
        let f = fixture();
        let modules = seed_course(&f.service).await;
        let (a, b) = (&modules[0].id, &modules[1].id);
        let l1 = f.service.add_lesson(a, "One").await.unwrap();
        f.service.add_lesson(b, "Two").await.unwrap();

        let moved = f.service.transfer_lesson(&l1.id, a, b, None).await.unwrap();
        assert_eq!(moved.lesson_order, 1);
    }

    #[tokio::test]
    async fn structure_nests_lessons() {
        let f = fixture();
        let modules = seed_course(&f.service).await;
        f.service.add_lesson(&modules[2].id, "Deep dive").await.unwrap();

        let outline = f.service.structure("c1").await.unwrap();
        assert_eq!(outline.len(), 3);
        assert!(outline[0].lessons.is_empty());
        assert_eq!(outline[2].lessons[0].title, "Deep dive");

        let json = serde_json::to_value(&outline).unwrap();
        assert_eq!(json[2]["title"], "Advanced");
        assert_eq!(json[2]["lessons"][0]["lesson_order"], 0);
    }

    #[tokio::test]
    async fn delete_module_closes_gap() {
        let f = fixture();
        let modules = seed_course(&f.service).await;
        let basics = modules[1].id.clone();
        f.service.add_lesson(&basics, "A").await.unwrap();
        f.service.add_lesson(&basics, "B").await.unwrap();

        let deleted = f.service.delete_module("c1", &basics).await.unwrap();
        assert_eq!(deleted, 2);

        let left = stored_modules(&f.modules, "c1");
        assert_eq!(module_titles(&left), vec!["Intro", "Advanced"]);
        assert!(sequencer::is_dense(&left));
        assert!(f.lessons.fetch_by_parent_key(&basics).unwrap().is_empty());

        let err = f.service.delete_module("c1", &basics).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn delete_lesson_closes_gap() {
        let f = fixture();
        let module = f.service.add_module("c1", "Intro").await.unwrap();
        let first = f.service.add_lesson(&module.id, "A").await.unwrap();
        f.service.add_lesson(&module.id, "B").await.unwrap();

        f.service.delete_lesson(&module.id, &first.id).await.unwrap();
        let left = stored_lessons(&f.lessons, &module.id);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].lesson_order, 0);
    }

    #[tokio::test]
    async fn unknown_module_move_is_not_found() {
        let f = fixture();
        seed_course(&f.service).await;
        let err = f
            .service
            .move_module("c1", "nope", Direction::Down)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }
    /// Record store that can hold a write until released, or fail it.
    struct Gated<R: Record> {
        inner: KvRecordStore<R>,
        fail: AtomicBool,
        gate: Mutex<Option<Receiver<()>>>,
    }

    impl<R: Record> Gated<R> {
        fn new(kv: Arc<dyn KVStore>) -> Self {
            Self {
                inner: KvRecordStore::new(kv),
                fail: AtomicBool::new(false),
                gate: Mutex::new(None),
            }
        }
    }

    impl<R: Record> RecordStore<R> for Gated<R> {
        fn fetch_by_parent_key(&self, parent_key: &str) -> Result<Vec<R>, ServiceError> {
            self.inner.fetch_by_parent_key(parent_key)
        }

        fn batch_write(&self, upserts: &[R], removals: &[RowKey]) -> Result<(), ServiceError> {
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.recv().unwrap();
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ServiceError::Storage("disk full".into()));
            }
            self.inner.batch_write(upserts, removals)
        }
    }

    fn gated_fixture() -> (Arc<CourseService>, Arc<Gated<Module>>, Arc<KvRecordStore<Lesson>>) {
        let kv: Arc<dyn KVStore> = Arc::new(RedbStore::open_in_memory().unwrap());
        let modules = Arc::new(Gated::<Module>::new(Arc::clone(&kv)));
        let lessons = Arc::new(KvRecordStore::<Lesson>::new(kv));
        let service = CourseService::new(
            Arc::clone(&modules) as Arc<dyn RecordStore<Module>>,
            Arc::clone(&lessons) as Arc<dyn RecordStore<Lesson>>,
        );
        (Arc::new(service), modules, lessons)
    }

    #[tokio::test]
    async fn writes_during_module_delete_are_rejected() {
        let (service, modules, lessons) = gated_fixture();
        let seeded = seed_course(&service).await;
        let basics = seeded[1].id.clone();
        service.add_lesson(&basics, "A").await.unwrap();
        service.add_lesson(&basics, "B").await.unwrap();

        let (release, gate) = mpsc::channel();
        *modules.gate.lock().unwrap() = Some(gate);
        let delete = {
            let service = Arc::clone(&service);
            let basics = basics.clone();
            tokio::spawn(async move { service.delete_module("c1", &basics).await })
        };
        while service.module_state("c1") != SyncState::Pending {
            tokio::task::yield_now().await;
        }

        let err = service.reorder_modules("c1", 1, 0).await.unwrap_err();
        assert_eq!(err.error_code(), "BUSY");
        assert_eq!(service.lesson_state(&basics), SyncState::Pending);
        let err = service.add_lesson(&basics, "C").await.unwrap_err();
        assert_eq!(err.error_code(), "BUSY");

        release.send(()).unwrap();
        assert_eq!(delete.await.unwrap().unwrap(), 2);

        let left = stored_modules(&modules.inner, "c1");
        assert_eq!(module_titles(&left), vec!["Intro", "Advanced"]);
        assert!(sequencer::is_dense(&left));
        assert!(stored_lessons(&lessons, &basics).is_empty());
    }

    #[tokio::test]
    async fn failed_module_delete_keeps_lessons() {
        let (service, modules, lessons) = gated_fixture();
        let seeded = seed_course(&service).await;
        let basics = seeded[1].id.clone();
        service.add_lesson(&basics, "A").await.unwrap();
        modules.fail.store(true, Ordering::SeqCst);

        let err = service.delete_module("c1", &basics).await.unwrap_err();
        assert_eq!(err.error_code(), "STORAGE_ERROR");
        assert!(err.is_retryable());
        assert_eq!(stored_modules(&modules.inner, "c1").len(), 3);
        assert_eq!(lesson_titles(&stored_lessons(&lessons, &basics)), vec!["A"]);
        assert_eq!(service.module_state("c1"), SyncState::RolledBack);
        assert_eq!(service.lesson_state(&basics), SyncState::RolledBack);

        // A retry goes through once the store recovers.
        modules.fail.store(false, Ordering::SeqCst);
        assert_eq!(service.delete_module("c1", &basics).await.unwrap(), 1);
        assert_eq!(stored_modules(&modules.inner, "c1").len(), 2);
        assert!(stored_lessons(&lessons, &basics).is_empty());
    }
}
