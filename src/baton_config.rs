//! Project configuration read from `.baton/baton.toml`.
//!
//! Layered file → environment → CLI. The role roster and gate list describe the run; the
//! remaining sections tune the orchestrator loop, the watchdog and worker launching.
//!
//! # Configuration File Format
//!
//! ```toml
//! # Optional: load the roster from a YAML file (`roles:` list) instead of [[roles]].
//! # roster_file = "roles.yaml"
//!
//! [[roles]]
//! id = "architect"
//! responsibilities = "Define architecture changes, contracts, non-goals."
//! output = "01-architecture.md"
//!
//! [[roles]]
//! id = "qa"
//! responsibilities = "Add/execute tests and report evidence."
//! output = "04-qa-report.md"
//! requires = ["evidence/test-run.txt"]
//!
//! [[gates]]
//! name = "build"
//! command = "cargo build"
//! timeout_secs = 900
//!
//! [watchdog]
//! threshold_minutes = 60
//!
//! [orchestrator]
//! poll_interval_secs = 5
//! role_timeout_secs = 3600
//!
//! [worker]
//! command = "my-agent --instructions \"$BATON_INSTRUCTIONS\""
//! ```

use crate::gates::GateSpec;
use crate::mailbox::{SUMMARY_ARTIFACT, is_reserved_artifact};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

pub const CONFIG_FILE: &str = "baton.toml";

/// Overrides `[worker] command`.
pub const WORKER_CMD_ENV: &str = "BATON_WORKER_CMD";
/// Overrides `[watchdog] threshold_minutes`.
pub const STALE_MINUTES_ENV: &str = "BATON_STALE_MINUTES";

static ROLE_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap());

/// Serializes tests that touch process environment variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Written by `baton init` and `baton config init`.
pub const DEFAULT_CONFIG: &str = r#"# baton configuration
#
# Roster: roles run one at a time, in this order. Each role must produce its `output`
# (relative to the run directory), every path in `requires`, and, unless `summary = false`,
# outbox/summary.md in its mailbox. Without any [[roles]] the built-in roster is used:
# architect, builder, data, qa, docs.
#
# [[roles]]
# id = "architect"
# responsibilities = "Define architecture changes, contracts, non-goals."
# output = "01-architecture.md"

# Gates run in order after every role has completed. The first failure fails the run.
# `baton orchestrate` refuses to start until a gate list is configured; use `gates = []`
# to run without gates.
#
# [[gates]]
# name = "build"
# command = "cargo build"
# timeout_secs = 600

[watchdog]
# Minutes a role may stay running before `baton watchdog` fails it.
# Also settable with BATON_STALE_MINUTES or --threshold-minutes.
# threshold_minutes = 60

[orchestrator]
poll_interval_secs = 5
role_timeout_secs = 3600

[worker]
# Shell command that launches one worker. Also settable with BATON_WORKER_CMD.
# Without a command, baton writes inbox/spawn_request.json for an external agent.
# command = "my-agent --instructions \"$BATON_INSTRUCTIONS\""
"#;

/// One role in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub id: String,
    #[serde(default)]
    pub responsibilities: String,
    /// Primary deliverable, relative to the run directory.
    pub output: String,
    /// Extra artifacts the role must produce.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// Whether `outbox/summary.md` is part of the completion contract.
    #[serde(default = "default_summary")]
    pub summary: bool,
}

fn default_summary() -> bool {
    true
}

impl RoleDefinition {
    fn builtin(id: &str, responsibilities: &str, output: &str) -> Self {
        Self {
            id: id.to_string(),
            responsibilities: responsibilities.to_string(),
            output: output.to_string(),
            requires: Vec::new(),
            summary: true,
        }
    }

    /// Everything this role must produce before `completed` is honored.
    pub fn required_outputs(&self) -> BTreeSet<String> {
        let mut required: BTreeSet<String> = self.requires.iter().cloned().collect();
        required.insert(self.output.clone());
        if self.summary {
            required.insert(SUMMARY_ARTIFACT.to_string());
        }
        required
    }
}

pub fn default_roster() -> Vec<RoleDefinition> {
    vec![
        RoleDefinition::builtin(
            "architect",
            "Define architecture changes, contracts, non-goals.",
            "01-architecture.md",
        ),
        RoleDefinition::builtin(
            "builder",
            "Implement approved scope (code/config).",
            "02-implementation.md",
        ),
        RoleDefinition::builtin("data", "Schema/seed/migrations if needed.", "03-data-notes.md"),
        RoleDefinition::builtin("qa", "Add/execute tests and report evidence.", "04-qa-report.md"),
        RoleDefinition::builtin(
            "docs",
            "Update README/runbook/release notes.",
            "05-release-notes.md",
        ),
    ]
}

/// YAML roster file layout.
#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    roles: Vec<RoleDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchdogSection {
    /// No default: a stale threshold must be chosen explicitly.
    #[serde(default)]
    pub threshold_minutes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How long one `orchestrate` call waits on a single role before returning.
    #[serde(default = "default_role_timeout_secs")]
    pub role_timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_role_timeout_secs() -> u64 {
    3600
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            role_timeout_secs: default_role_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSection {
    #[serde(default)]
    pub command: Option<String>,
}

/// The complete baton.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatonToml {
    /// YAML roster, relative to `.baton/`. Takes precedence over `[[roles]]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roster_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<RoleDefinition>,
    /// `None` means "not configured", which is different from an explicit empty list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gates: Option<Vec<GateSpec>>,
    #[serde(default)]
    pub watchdog: WatchdogSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub worker: WorkerSection,
}

impl BatonToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse baton.toml")
    }

    /// Load `.baton/baton.toml`, or defaults if it doesn't exist.
    pub fn load_or_default(baton_dir: &Path) -> Result<Self> {
        let config_path = baton_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// The effective roster: YAML file, then `[[roles]]`, then the built-in roster.
    pub fn roster(&self, baton_dir: &Path) -> Result<Vec<RoleDefinition>> {
        if let Some(ref file) = self.roster_file {
            let path = baton_dir.join(file);
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read roster file: {}", path.display()))?;
            let parsed: RosterFile = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse roster file: {}", path.display()))?;
            return Ok(parsed.roles);
        }
        if !self.roles.is_empty() {
            return Ok(self.roles.clone());
        }
        Ok(default_roster())
    }

    /// Worker command, environment first.
    pub fn worker_command(&self) -> Option<String> {
        std::env::var(WORKER_CMD_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.worker.command.clone())
    }

    /// Stale threshold, environment first. Unparsable environment values are ignored.
    pub fn threshold_minutes(&self) -> Option<u64> {
        std::env::var(STALE_MINUTES_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .or(self.watchdog.threshold_minutes)
    }

    /// Return warnings for anything questionable; hard roster errors are also reported here.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.roster_file.is_none() {
            let roles = if self.roles.is_empty() {
                default_roster()
            } else {
                self.roles.clone()
            };
            if let Err(e) = validate_roster(&roles) {
                warnings.push(format!("{:#}", e));
            }
        }

        match &self.gates {
            None => warnings.push(
                "No gates configured: `baton orchestrate` will refuse to run (use `gates = []` to run without gates)"
                    .to_string(),
            ),
            Some(gates) => {
                let mut names = HashSet::new();
                for gate in gates {
                    if gate.name.trim().is_empty() {
                        warnings.push("Gate with an empty name".to_string());
                    }
                    if !names.insert(gate.name.as_str()) {
                        warnings.push(format!("Duplicate gate name '{}'", gate.name));
                    }
                    if gate.command.trim().is_empty() {
                        warnings.push(format!("Gate '{}' has an empty command", gate.name));
                    }
                    if gate.timeout_secs == 0 {
                        warnings.push(format!("Gate '{}' has timeout_secs = 0", gate.name));
                    }
                }
            }
        }

        if self.orchestrator.poll_interval_secs == 0 {
            warnings.push("orchestrator.poll_interval_secs must be at least 1".to_string());
        }
        if self.orchestrator.role_timeout_secs == 0 {
            warnings.push("orchestrator.role_timeout_secs must be at least 1".to_string());
        }
        if self.watchdog.threshold_minutes == Some(0) {
            warnings.push("watchdog.threshold_minutes = 0 marks every running role stale".to_string());
        }

        warnings
    }
}

/// Reject rosters the orchestrator cannot run.
pub fn validate_roster(roles: &[RoleDefinition]) -> Result<()> {
    if roles.is_empty() {
        anyhow::bail!("Roster is empty");
    }
    let mut ids = HashSet::new();
    for role in roles {
        if !ROLE_ID_REGEX.is_match(&role.id) {
            anyhow::bail!(
                "Invalid role id '{}': use lowercase letters, digits, '-' or '_', starting with a letter",
                role.id
            );
        }
        if !ids.insert(role.id.as_str()) {
            anyhow::bail!("Duplicate role id '{}'", role.id);
        }
        if role.output.trim().is_empty() {
            anyhow::bail!("Role '{}' has no output file", role.id);
        }
        for artifact in std::iter::once(&role.output).chain(role.requires.iter()) {
            if !is_relative_artifact(artifact) {
                anyhow::bail!(
                    "Role '{}' artifact '{}' must be a relative path inside the run",
                    role.id,
                    artifact
                );
            }
            if is_reserved_artifact(artifact) {
                anyhow::bail!(
                    "Role '{}' artifact '{}' names a file baton writes into the run directory",
                    role.id,
                    artifact
                );
            }
        }
    }
    Ok(())
}

fn is_relative_artifact(artifact: &str) -> bool {
    let path = Path::new(artifact);
    !artifact.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
