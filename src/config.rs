use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::baton_config::{BatonToml, CONFIG_FILE, RoleDefinition, validate_roster};
use crate::errors::OrchestratorError;
use crate::gates::GateSpec;
use crate::init::BATON_DIR;
use crate::manifest::ManifestStore;

/// Runtime configuration: resolved project paths plus the parsed `baton.toml`.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub baton_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub agents_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub toml: BatonToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let baton_dir = project_dir.join(BATON_DIR);
        let toml = BatonToml::load_or_default(&baton_dir)?;

        Ok(Self {
            runs_dir: baton_dir.join("runs"),
            agents_dir: baton_dir.join("agents"),
            log_dir: baton_dir.join("logs"),
            project_dir,
            baton_dir,
            verbose,
            toml,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.runs_dir).context("Failed to create runs directory")?;
        std::fs::create_dir_all(&self.agents_dir).context("Failed to create agents directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.baton_dir.join(CONFIG_FILE)
    }

    pub fn store(&self) -> ManifestStore {
        ManifestStore::new(&self.runs_dir)
    }

    /// The validated roster for new runs.
    pub fn roster(&self) -> Result<Vec<RoleDefinition>> {
        let roster = self.toml.roster(&self.baton_dir)?;
        validate_roster(&roster)?;
        Ok(roster)
    }

    /// Gate list. Must be configured explicitly, even if empty.
    pub fn gates(&self) -> Result<Vec<GateSpec>, OrchestratorError> {
        self.toml.gates.clone().ok_or_else(|| {
            OrchestratorError::MissingConfig(format!(
                "no gate list in {} (add [[gates]] entries, or `gates = []` to run without gates)",
                self.config_path().display()
            ))
        })
    }

    /// Stale threshold: CLI → environment → file. There is no default.
    pub fn threshold_minutes(&self, cli: Option<u64>) -> Result<u64, OrchestratorError> {
        cli.or_else(|| self.toml.threshold_minutes()).ok_or_else(|| {
            OrchestratorError::MissingConfig(
                "stale threshold not set (use --threshold-minutes, BATON_STALE_MINUTES or [watchdog] threshold_minutes)"
                    .to_string(),
            )
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.toml.orchestrator.poll_interval_secs.max(1))
    }

    pub fn role_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.orchestrator.role_timeout_secs.max(1))
    }

    pub fn worker_command(&self) -> Option<String> {
        self.toml.worker_command()
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if self.toml.roster_file.is_some()
            && let Err(e) = self.roster()
        {
            warnings.push(format!("{:#}", e));
        }
        warnings
    }
}
