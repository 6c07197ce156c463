use serde::{Deserialize, Serialize};

use lms_core::new_id;
use lms_outline::{Ordered, Record, Reparent};

// ---------------------------------------------------------------------------
// Module: an ordered section of a course
// ---------------------------------------------------------------------------

/// A course module. Ordered among the modules of `course_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub module_order: u32,
}

impl Module {
    /// New module with a fresh id. The order is assigned on insert.
    pub fn new(course_id: &str, title: &str) -> Self {
        Self {
            id: new_id(),
            course_id: course_id.to_string(),
            title: title.to_string(),
            module_order: 0,
        }
    }
}

impl Ordered for Module {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_key(&self) -> &str {
        &self.course_id
    }

    fn order(&self) -> u32 {
        self.module_order
    }

    fn set_order(&mut self, order: u32) {
        self.module_order = order;
    }
}

impl Record for Module {
    const TABLE: &'static str = "modules";

    fn partition(&self) -> &str {
        &self.course_id
    }
}

// ---------------------------------------------------------------------------
// Lesson: an ordered entry of a module
// ---------------------------------------------------------------------------

/// A lesson. Ordered among the lessons of `module_id`; can be transferred to
/// another module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub module_id: String,
    pub title: String,
    pub lesson_order: u32,
}

impl Lesson {
    pub fn new(module_id: &str, title: &str) -> Self {
        Self {
            id: new_id(),
            module_id: module_id.to_string(),
            title: title.to_string(),
            lesson_order: 0,
        }
    }
}

impl Ordered for Lesson {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_key(&self) -> &str {
        &self.module_id
    }

    fn order(&self) -> u32 {
        self.lesson_order
    }

    fn set_order(&mut self, order: u32) {
        self.lesson_order = order;
    }
}

impl Reparent for Lesson {
    fn set_parent_key(&mut self, parent_key: &str) {
        self.module_id = parent_key.to_string();
    }
}

impl Record for Lesson {
    const TABLE: &'static str = "lessons";

    fn partition(&self) -> &str {
        &self.module_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_uses_column_names() {
        let module = Module {
            id: "m1".into(),
            course_id: "c1".into(),
            title: "Intro".into(),
            module_order: 2,
        };
        let json = serde_json_value(&module);
        assert_eq!(json["module_order"], 2);
        assert_eq!(json["course_id"], "c1");

        let lesson = Lesson {
            id: "l1".into(),
            module_id: "m1".into(),
            title: "Welcome".into(),
            lesson_order: 0,
        };
        let json = serde_json_value(&lesson);
        assert_eq!(json["lesson_order"], 0);
        assert_eq!(json["module_id"], "m1");
    }

    #[test]
    fn reparent_moves_lesson_partition() {
        let mut lesson = Lesson::new("m1", "Welcome");
        assert_eq!(lesson.partition(), "m1");
        lesson.set_parent_key("m2");
        assert_eq!(lesson.partition(), "m2");
        assert_eq!(lesson.parent_key(), "m2");
    }

    #[test]
    fn new_records_get_distinct_ids() {
        let a = Module::new("c1", "A");
        let b = Module::new("c1", "B");
        assert_ne!(a.id, b.id);
        assert_eq!(a.module_order, 0);
    }

    fn serde_json_value<T: Serialize>(value: &T) -> serde_json::Value {
        serde_json::to_value(value).unwrap()
    }
}
