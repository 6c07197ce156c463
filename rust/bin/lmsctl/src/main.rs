//! `lmsctl`: admin CLI for LMS course outlines and role navigation.
//!
//! Works directly against the local database:
//!
//! ```text
//! lmsctl nav sync --role admin
//! lmsctl module reorder --course c1 --from 2 --to 0
//! lmsctl lesson transfer --lesson l1 --from-module m1 --to-module m2
//! ```

mod commands;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgGroup, Parser, Subcommand};
use tracing::{debug, info};

use course::{CourseModule, Role};
use lms_core::ServiceError;
use lms_kv::{KVStore, RedbStore};
use lms_outline::Direction;

/// LMS admin CLI.
#[derive(Parser, Debug)]
#[command(name = "lmsctl", about = "LMS course outline and navigation admin")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides the config file).
    #[arg(long = "data-dir", global = true)]
    data_dir: Option<PathBuf>,

    /// Database file (overrides the config file).
    #[arg(long = "db", global = true)]
    db: Option<PathBuf>,

    /// Output format: table or json.
    #[arg(long = "output", short = 'o', global = true, default_value = "table")]
    output: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Role navigation.
    Nav {
        #[command(subcommand)]
        action: NavAction,
    },

    /// Course modules.
    Module {
        #[command(subcommand)]
        action: ModuleAction,
    },

    /// Lessons inside modules.
    Lesson {
        #[command(subcommand)]
        action: LessonAction,
    },

    /// Print a course with its modules and lessons.
    Outline {
        #[arg(long)]
        course: String,
    },

    /// Show version.
    Version,
}

#[derive(Subcommand, Debug)]
enum NavAction {
    /// Reconcile the built-in navigation with the stored one.
    Sync {
        /// Role to sync (default: every role).
        #[arg(long)]
        role: Option<Role>,
    },
    /// Print the navigation tree of a role.
    Show {
        #[arg(long)]
        role: Role,
        /// Include hidden items.
        #[arg(long)]
        all: bool,
    },
    /// Hide an item (and its children) from the sidebar.
    Hide {
        #[arg(long)]
        role: Role,
        #[arg(long)]
        id: String,
    },
    /// Show a hidden item again.
    Unhide {
        #[arg(long)]
        role: Role,
        #[arg(long)]
        id: String,
    },
    /// Reorder the children of an item (top level if no --parent).
    ///
    /// Indices count hidden items (see `nav show --all`); inactive ones are
    /// skipped.
    Reorder {
        #[arg(long)]
        role: Role,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        from: usize,
        #[arg(long)]
        to: usize,
    },
    /// Delete an item and everything below it.
    Delete {
        #[arg(long)]
        role: Role,
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ModuleAction {
    /// List the modules of a course.
    List {
        #[arg(long)]
        course: String,
    },
    /// Append a module to a course.
    Add {
        #[arg(long)]
        course: String,
        #[arg(long)]
        title: String,
    },
    /// Move the module at --from to --to (zero-based, clamped).
    Reorder {
        #[arg(long)]
        course: String,
        #[arg(long)]
        from: usize,
        #[arg(long)]
        to: usize,
    },
    /// Move a module one step up or down.
    #[command(group(ArgGroup::new("direction").required(true).args(["up", "down"])))]
    Move {
        #[arg(long)]
        course: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        up: bool,
        #[arg(long)]
        down: bool,
    },
    /// Delete a module and its lessons.
    Delete {
        #[arg(long)]
        course: String,
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum LessonAction {
    /// List the lessons of a module.
    List {
        #[arg(long)]
        module: String,
    },
    /// Append a lesson to a module.
    Add {
        #[arg(long)]
        module: String,
        #[arg(long)]
        title: String,
    },
    /// Move the lesson at --from to --to (zero-based, clamped).
    Reorder {
        #[arg(long)]
        module: String,
        #[arg(long)]
        from: usize,
        #[arg(long)]
        to: usize,
    },
    /// Move a lesson one step up or down.
    #[command(group(ArgGroup::new("direction").required(true).args(["up", "down"])))]
    Move {
        #[arg(long)]
        module: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        up: bool,
        #[arg(long)]
        down: bool,
    },
    /// Move a lesson into another module.
    Transfer {
        #[arg(long)]
        lesson: String,
        #[arg(long = "from-module")]
        from_module: String,
        #[arg(long = "to-module")]
        to_module: String,
        /// Position in the target module (default: end).
        #[arg(long)]
        index: Option<usize>,
    },
    /// Delete a lesson.
    Delete {
        #[arg(long)]
        module: String,
        #[arg(long)]
        id: String,
    },
}

fn direction(up: bool) -> Direction {
    if up { Direction::Up } else { Direction::Down }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        match e.downcast_ref::<ServiceError>() {
            Some(err) => {
                eprintln!("Error [{}]: {}", err.error_code(), err);
                if err.is_retryable() {
                    eprintln!("Nothing was changed; the command can be retried.");
                }
            }
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Version = cli.command {
        println!("lmsctl v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let json = match cli.output.as_str() {
        "json" => true,
        "table" => false,
        other => anyhow::bail!("Unknown output format: {} (use table or json)", other),
    };

    let config = config::resolve(cli.config.as_deref(), cli.data_dir, cli.db)?;
    let db_path = config.resolve_db_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    debug!("Opening database {}", db_path.display());
    let kv: Arc<dyn KVStore> = Arc::new(
        RedbStore::open(&db_path)
            .map_err(|e| anyhow::anyhow!("failed to open database {}: {}", db_path.display(), e))?,
    );
    let course = CourseModule::new(kv).with_navigation_overrides(config.resolve_navigation_dir());

    match cli.command {
        Commands::Nav { action } => match action {
            NavAction::Sync { role } => commands::nav::sync(&course, role, json)?,
            NavAction::Show { role, all } => commands::nav::show(&course, role, all, json)?,
            NavAction::Hide { role, id } => {
                commands::nav::set_visibility(&course, role, &id, false)?
            }
            NavAction::Unhide { role, id } => {
                commands::nav::set_visibility(&course, role, &id, true)?
            }
            NavAction::Reorder {
                role,
                parent,
                from,
                to,
            } => commands::nav::reorder(&course, role, parent.as_deref(), from, to, json)?,
            NavAction::Delete { role, id } => commands::nav::delete(&course, role, &id)?,
        },

        Commands::Module { action } => match action {
            ModuleAction::List { course: course_id } => {
                commands::course::list_modules(&course, &course_id, json).await?
            }
            ModuleAction::Add {
                course: course_id,
                title,
            } => commands::course::add_module(&course, &course_id, &title, json).await?,
            ModuleAction::Reorder {
                course: course_id,
                from,
                to,
            } => commands::course::reorder_modules(&course, &course_id, from, to, json).await?,
            ModuleAction::Move {
                course: course_id,
                id,
                up,
                down: _,
            } => {
                commands::course::move_module(&course, &course_id, &id, direction(up), json)
                    .await?
            }
            ModuleAction::Delete {
                course: course_id,
                id,
            } => commands::course::delete_module(&course, &course_id, &id).await?,
        },

        Commands::Lesson { action } => match action {
            LessonAction::List { module } => {
                commands::course::list_lessons(&course, &module, json).await?
            }
            LessonAction::Add { module, title } => {
                commands::course::add_lesson(&course, &module, &title, json).await?
            }
            LessonAction::Reorder { module, from, to } => {
                commands::course::reorder_lessons(&course, &module, from, to, json).await?
            }
            LessonAction::Move {
                module,
                id,
                up,
                down: _,
            } => {
                commands::course::move_lesson(&course, &module, &id, direction(up), json).await?
            }
            LessonAction::Transfer {
                lesson,
                from_module,
                to_module,
                index,
            } => {
                commands::course::transfer_lesson(
                    &course,
                    &lesson,
                    &from_module,
                    &to_module,
                    index,
                    json,
                )
                .await?
            }
            LessonAction::Delete { module, id } => {
                commands::course::delete_lesson(&course, &module, &id).await?
            }
        },

        Commands::Outline { course: course_id } => {
            commands::course::outline(&course, &course_id, json).await?
        }

        Commands::Version => {}
    }

    info!("Done.");
    Ok(())
}
