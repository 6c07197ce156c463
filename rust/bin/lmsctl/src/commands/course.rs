//! `lmsctl module ...` and `lmsctl lesson ...`: course structure edits.

use anyhow::Result;

use course::{CourseModule, Lesson, Module};
use lms_outline::Direction;

use super::print_json;

fn print_modules(modules: &[Module], json: bool) -> Result<()> {
    if json {
        return print_json(&modules);
    }
    if modules.is_empty() {
        println!("No modules.");
    }
    for module in modules {
        println!("{:<3} {:<32} {}", module.module_order, module.title, module.id);
    }
    Ok(())
}

fn print_lessons(lessons: &[Lesson], json: bool) -> Result<()> {
    if json {
        return print_json(&lessons);
    }
    if lessons.is_empty() {
        println!("No lessons.");
    }
    for lesson in lessons {
        println!("{:<3} {:<32} {}", lesson.lesson_order, lesson.title, lesson.id);
    }
    Ok(())
}

pub async fn outline(course: &CourseModule, course_id: &str, json: bool) -> Result<()> {
    let outline = course.courses().structure(course_id).await?;
    if json {
        return print_json(&outline);
    }
    if outline.is_empty() {
        println!("Course {} has no modules.", course_id);
    }
    for entry in &outline {
        println!(
            "{:<3} {:<32} {}",
            entry.module.module_order, entry.module.title, entry.module.id
        );
        for lesson in &entry.lessons {
            println!("    {:<3} {:<28} {}", lesson.lesson_order, lesson.title, lesson.id);
        }
    }
    Ok(())
}

pub async fn list_modules(course: &CourseModule, course_id: &str, json: bool) -> Result<()> {
    let modules = course.courses().modules(course_id).await?;
    print_modules(&modules, json)
}

pub async fn add_module(course: &CourseModule, course_id: &str, title: &str, json: bool) -> Result<()> {
    let module = course.courses().add_module(course_id, title).await?;
    if json {
        return print_json(&module);
    }
    println!("Created module {} at position {}.", module.id, module.module_order);
    Ok(())
}

pub async fn reorder_modules(
    course: &CourseModule,
    course_id: &str,
    from: usize,
    to: usize,
    json: bool,
) -> Result<()> {
    let modules = course.courses().reorder_modules(course_id, from, to).await?;
    print_modules(&modules, json)
}

pub async fn move_module(
    course: &CourseModule,
    course_id: &str,
    module_id: &str,
    direction: Direction,
    json: bool,
) -> Result<()> {
    let modules = course
        .courses()
        .move_module(course_id, module_id, direction)
        .await?;
    print_modules(&modules, json)
}

pub async fn delete_module(course: &CourseModule, course_id: &str, module_id: &str) -> Result<()> {
    let lessons = course.courses().delete_module(course_id, module_id).await?;
    println!("Deleted module {} and {} lesson(s).", module_id, lessons);
    Ok(())
}

pub async fn list_lessons(course: &CourseModule, module_id: &str, json: bool) -> Result<()> {
    let lessons = course.courses().lessons(module_id).await?;
    print_lessons(&lessons, json)
}

pub async fn add_lesson(course: &CourseModule, module_id: &str, title: &str, json: bool) -> Result<()> {
    let lesson = course.courses().add_lesson(module_id, title).await?;
    if json {
        return print_json(&lesson);
    }
    println!("Created lesson {} at position {}.", lesson.id, lesson.lesson_order);
    Ok(())
}

pub async fn reorder_lessons(
    course: &CourseModule,
    module_id: &str,
    from: usize,
    to: usize,
    json: bool,
) -> Result<()> {
    let lessons = course.courses().reorder_lessons(module_id, from, to).await?;
    print_lessons(&lessons, json)
}

pub async fn move_lesson(
    course: &CourseModule,
    module_id: &str,
    lesson_id: &str,
    direction: Direction,
    json: bool,
) -> Result<()> {
    let lessons = course
        .courses()
        .move_lesson(module_id, lesson_id, direction)
        .await?;
    print_lessons(&lessons, json)
}

pub async fn transfer_lesson(
    course: &CourseModule,
    lesson_id: &str,
    from_module: &str,
    to_module: &str,
    index: Option<usize>,
    json: bool,
) -> Result<()> {
    let lesson = course
        .courses()
        .transfer_lesson(lesson_id, from_module, to_module, index)
        .await?;
    if json {
        return print_json(&lesson);
    }
    println!(
        "Moved lesson {} to module {} at position {}.",
        lesson.id, lesson.module_id, lesson.lesson_order
    );
    Ok(())
}

pub async fn delete_lesson(course: &CourseModule, module_id: &str, lesson_id: &str) -> Result<()> {
    course.courses().delete_lesson(module_id, lesson_id).await?;
    println!("Deleted lesson {}.", lesson_id);
    Ok(())
}
