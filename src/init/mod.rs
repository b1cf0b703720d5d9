//! `baton init`: create the `.baton/` directory structure in a project.
//!
//! ```text
//! .baton/
//! ├── baton.toml   # project configuration (commented defaults)
//! ├── runs/        # one directory per run: manifest, log, run packet
//! ├── agents/      # worker mailboxes, per run and role
//! └── logs/        # diagnostic logs
//! ```

use crate::baton_config::{CONFIG_FILE, DEFAULT_CONFIG};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// The name of the baton configuration directory.
pub const BATON_DIR: &str = ".baton";

#[derive(Debug)]
pub struct InitResult {
    pub baton_dir: PathBuf,
    /// False if `.baton/` already existed.
    pub created: bool,
    /// Whether a default `baton.toml` was written.
    pub wrote_config: bool,
}

/// Initialize a baton project. Safe to run repeatedly: existing files are left alone.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let baton_dir = project_dir.join(BATON_DIR);
    let created = !baton_dir.exists();

    for dir in [
        baton_dir.clone(),
        baton_dir.join("runs"),
        baton_dir.join("agents"),
        baton_dir.join("logs"),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config_path = baton_dir.join(CONFIG_FILE);
    let wrote_config = !config_path.exists();
    if wrote_config {
        std::fs::write(&config_path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to create {}", config_path.display()))?;
    }

    Ok(InitResult {
        baton_dir,
        created,
        wrote_config,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(BATON_DIR).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_project_creates_structure() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.created);
        assert!(result.wrote_config);
        assert_eq!(result.baton_dir, dir.path().join(".baton"));
        for sub in ["runs", "agents", "logs"] {
            assert!(result.baton_dir.join(sub).is_dir(), "{sub} missing");
        }
        assert!(result.baton_dir.join("baton.toml").is_file());
        assert!(is_initialized(dir.path()));
    }

    #[test]
    fn test_init_project_is_idempotent_and_keeps_config() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let config = dir.path().join(".baton/baton.toml");
        std::fs::write(&config, "gates = []\n").unwrap();

        let again = init_project(dir.path()).unwrap();
        assert!(!again.created);
        assert!(!again.wrote_config);
        assert_eq!(std::fs::read_to_string(&config).unwrap(), "gates = []\n");
    }

    #[test]
    fn test_not_initialized_without_directory() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
    }
}
