//! Worker mailbox: the only channel between the orchestrator and a worker.
//!
//! Each spawned role gets its own directory:
//!
//! ```text
//! .baton/agents/<run_id>/<role>/
//! ├── inbox/
//! │   ├── instructions.md     # written by baton, read-only to the worker
//! │   └── spawn_request.json  # handoff mode only
//! ├── outbox/
//! │   └── summary.md          # written by the worker
//! ├── workspace/              # scratch space for the worker
//! ├── status.json             # worker-reported state
//! └── spawn_ready             # handoff mode only
//! ```
//!
//! A worker's `completed` is a claim, not a fact. The orchestrator re-checks the role's
//! required artifacts with [`Mailbox::observe_outputs`] before honoring it.

use crate::manifest::{ManifestStore, RoleRecord};
use crate::packet;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Artifact ids with this prefix live in the role's mailbox; everything else is relative to
/// the run directory.
pub const OUTBOX_PREFIX: &str = "outbox/";
pub const SUMMARY_ARTIFACT: &str = "outbox/summary.md";

/// Whether an artifact id names a file baton itself writes into the run directory. Such an
/// artifact exists before the worker runs, so it can never count as produced by one.
pub fn is_reserved_artifact(artifact: &str) -> bool {
    if artifact.starts_with(OUTBOX_PREFIX) {
        return false;
    }
    let mut names = Path::new(artifact).components().filter_map(|c| match c {
        Component::Normal(name) => name.to_str(),
        _ => None,
    });
    match (names.next(), names.next()) {
        (Some(name), None) => packet::is_packet_file(name) || ManifestStore::is_store_file(name),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Contents of `status.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    /// Timestamps are kept as the worker wrote them.
    #[serde(default)]
    pub started: Option<String>,
    #[serde(default)]
    pub completed: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub role: String,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct Mailbox {
    run_id: String,
    role_id: String,
    dir: PathBuf,
    run_dir: PathBuf,
}

impl Mailbox {
    pub fn new(agents_dir: &Path, run_dir: &Path, run_id: &str, role_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            role_id: role_id.to_string(),
            dir: agents_dir.join(run_id).join(role_id),
            run_dir: run_dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn role_id(&self) -> &str {
        &self.role_id
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.dir.join("inbox")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.dir.join("outbox")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.dir.join("workspace")
    }

    pub fn instructions_path(&self) -> PathBuf {
        self.inbox_dir().join("instructions.md")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.resolve_artifact(SUMMARY_ARTIFACT)
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join("status.json")
    }

    pub fn spawn_request_path(&self) -> PathBuf {
        self.inbox_dir().join("spawn_request.json")
    }

    pub fn spawn_ready_path(&self) -> PathBuf {
        self.dir.join("spawn_ready")
    }

    /// Absolute path of an artifact id.
    pub fn resolve_artifact(&self, artifact: &str) -> PathBuf {
        match artifact.strip_prefix(OUTBOX_PREFIX) {
            Some(rest) => self.outbox_dir().join(rest),
            None => self.run_dir.join(artifact),
        }
    }

    /// Create the mailbox, write instructions, and mark the worker `running`.
    pub fn prepare(&self, record: &RoleRecord, objective: &str) -> Result<()> {
        for dir in [self.inbox_dir(), self.outbox_dir(), self.workspace_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        let instructions = self.render_instructions(record, objective);
        let path = self.instructions_path();
        std::fs::write(&path, instructions)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        self.write_status(&WorkerStatus {
            state: WorkerState::Running,
            started: Some(Utc::now().to_rfc3339()),
            completed: None,
            error: None,
            role: self.role_id.clone(),
            run_id: self.run_id.clone(),
        })
    }

    fn render_instructions(&self, record: &RoleRecord, objective: &str) -> String {
        let mut out = format!("# Task: {}\n\n", self.role_id);
        out.push_str(&format!("## Objective\n{}\n\n", objective));
        out.push_str(&format!("## Run packet\n{}\n\n", self.run_dir.display()));
        out.push_str(&format!(
            "## Output file\n{}\n\n",
            self.resolve_artifact(&record.deliverable).display()
        ));

        let brief = self.run_dir.join(packet::brief_file(&self.role_id));
        if let Ok(content) = std::fs::read_to_string(&brief) {
            out.push_str("## Brief\n");
            out.push_str(content.trim_end());
            out.push_str("\n\n");
        }

        out.push_str("## Required outputs\n");
        for artifact in &record.required_outputs {
            out.push_str(&format!("- {}\n", self.resolve_artifact(artifact).display()));
        }

        out.push_str("\n## Requirements\n");
        out.push_str("- Read RUN.md and the acceptance criteria\n");
        out.push_str("- Only touch files in scope described in RUN.md\n");
        out.push_str("- Write your deliverable to the output file above\n");
        if record.required_outputs.contains(SUMMARY_ARTIFACT) {
            out.push_str(&format!(
                "- Write a short summary to {}\n",
                self.summary_path().display()
            ));
        }
        out.push_str(&format!(
            "- Set \"state\" in {} to \"completed\" when done, or \"failed\" with an \"error\"\n",
            self.status_path().display()
        ));
        out
    }

    pub fn write_status(&self, status: &WorkerStatus) -> Result<()> {
        let path = self.status_path();
        let json = serde_json::to_string_pretty(status).context("Failed to serialize worker status")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Worker-reported status. `None` when there is no readable status yet.
    ///
    /// A half-written or malformed file is not an error: the worker may be mid-write. A
    /// status naming a different run or role is ignored.
    pub fn read_status(&self) -> Result<Option<WorkerStatus>> {
        let path = self.status_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        match serde_json::from_str::<WorkerStatus>(&content) {
            Ok(status) if status.role != self.role_id || status.run_id != self.run_id => {
                tracing::warn!(
                    run_id = %self.run_id,
                    role = %self.role_id,
                    status_run_id = %status.run_id,
                    status_role = %status.role,
                    "worker status names another run or role, ignoring it"
                );
                Ok(None)
            }
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                tracing::warn!(
                    run_id = %self.run_id,
                    role = %self.role_id,
                    error = %e,
                    "unreadable worker status, treating as still running"
                );
                Ok(None)
            }
        }
    }

    /// Subset of `required` that exists as a non-empty file right now. Reserved run files
    /// are never observed.
    pub fn observe_outputs(&self, required: &BTreeSet<String>) -> BTreeSet<String> {
        required
            .iter()
            .filter(|artifact| !is_reserved_artifact(artifact))
            .filter(|artifact| {
                std::fs::metadata(self.resolve_artifact(artifact))
                    .map(|meta| meta.is_file() && meta.len() > 0)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}
