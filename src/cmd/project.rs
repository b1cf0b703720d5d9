//! Project initialization: `baton init`.

use anyhow::Result;
use std::path::Path;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    use baton::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);
    let result = init_project(project_dir)?;

    if result.created {
        println!("Initialized baton project at {}", result.baton_dir.display());
        println!();
        println!("Created directory structure:");
        println!("  .baton/");
        println!("  ├── baton.toml   # Roster, gates, watchdog threshold, worker command");
        println!("  ├── runs/        # Manifests, audit logs and run packets");
        println!("  ├── agents/      # Worker mailboxes");
        println!("  └── logs/        # Diagnostic logs");
        println!();
        println!("Next steps:");
        println!("  1. Configure [[gates]] and [worker] in .baton/baton.toml");
        println!("  2. Run `baton create --objective \"...\"` to start a run");
        println!("  3. Run `baton orchestrate <run-id>` to drive it");
    } else if was_initialized {
        println!(
            "Baton project already initialized at {}",
            result.baton_dir.display()
        );
        if result.wrote_config {
            println!("Restored missing baton.toml with defaults.");
        } else {
            println!("Directory structure verified.");
        }
    } else {
        println!(
            "Completed baton initialization at {}",
            result.baton_dir.display()
        );
    }

    Ok(())
}
