//! Launching workers.
//!
//! The orchestrator only needs a worker to *start*; everything after that goes through the
//! mailbox. [`WorkerSpawner`] is the seam: [`CommandSpawner`] runs a configured shell command
//! detached, [`HandoffSpawner`] leaves a request file for an external agent runner to pick up.

use crate::config::Config;
use crate::mailbox::Mailbox;
use crate::manifest::RoleRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use uuid::Uuid;

/// Everything a worker needs to find its mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub request_id: Uuid,
    pub run_id: String,
    pub role_id: String,
    pub attempt: u32,
    pub mailbox_dir: PathBuf,
    pub instructions_path: PathBuf,
    pub status_path: PathBuf,
    pub summary_path: PathBuf,
    pub deliverable_path: PathBuf,
    pub requested_at: DateTime<Utc>,
}

impl SpawnRequest {
    pub fn new(run_id: &str, mailbox: &Mailbox, record: &RoleRecord) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            run_id: run_id.to_string(),
            role_id: record.role_id.clone(),
            attempt: record.attempts,
            mailbox_dir: mailbox.dir().to_path_buf(),
            instructions_path: mailbox.instructions_path(),
            status_path: mailbox.status_path(),
            summary_path: mailbox.summary_path(),
            deliverable_path: mailbox.resolve_artifact(&record.deliverable),
            requested_at: Utc::now(),
        }
    }
}

/// Starts a worker for one role. Must return once the worker is launched, not when it is done.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, request: &SpawnRequest) -> Result<()>;
}

/// Runs a shell command per role, detached, with the mailbox location in `BATON_*` variables.
pub struct CommandSpawner {
    command: String,
    project_dir: PathBuf,
}

impl CommandSpawner {
    pub fn new(command: impl Into<String>, project_dir: impl AsRef<Path>) -> Self {
        Self {
            command: command.into(),
            project_dir: project_dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl WorkerSpawner for CommandSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> Result<()> {
        let log_path = request.mailbox_dir.join("worker.log");
        let stdout = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create {}", log_path.display()))?;
        let stderr = stdout
            .try_clone()
            .context("Failed to duplicate worker log handle")?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .env("BATON_RUN_ID", &request.run_id)
            .env("BATON_ROLE", &request.role_id)
            .env("BATON_MAILBOX", &request.mailbox_dir)
            .env("BATON_INSTRUCTIONS", &request.instructions_path)
            .env("BATON_STATUS", &request.status_path)
            .env("BATON_SUMMARY", &request.summary_path)
            .env("BATON_DELIVERABLE", &request.deliverable_path)
            .spawn()
            .with_context(|| format!("Failed to spawn worker command: {}", self.command))?;

        tracing::info!(
            run_id = %request.run_id,
            role = %request.role_id,
            pid = child.id().unwrap_or(0),
            log = %log_path.display(),
            "worker spawned"
        );
        // Detached: the worker reports through its status file, not its exit code.
        drop(child);
        Ok(())
    }
}

/// Writes `inbox/spawn_request.json` and a `spawn_ready` marker for an external agent.
pub struct HandoffSpawner;

#[async_trait]
impl WorkerSpawner for HandoffSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> Result<()> {
        let inbox = request.mailbox_dir.join("inbox");
        std::fs::create_dir_all(&inbox)
            .with_context(|| format!("Failed to create directory: {}", inbox.display()))?;

        let path = inbox.join("spawn_request.json");
        let json = serde_json::to_string_pretty(request).context("Failed to serialize spawn request")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

        let marker = request.mailbox_dir.join("spawn_ready");
        std::fs::write(&marker, request.request_id.to_string())
            .with_context(|| format!("Failed to write {}", marker.display()))?;

        tracing::info!(
            run_id = %request.run_id,
            role = %request.role_id,
            request = %path.display(),
            "spawn request handed off"
        );
        Ok(())
    }
}

/// Command spawner when a worker command is configured, handoff otherwise.
pub fn spawner_from_config(config: &Config) -> Arc<dyn WorkerSpawner> {
    match config.worker_command() {
        Some(command) => Arc::new(CommandSpawner::new(command, &config.project_dir)),
        None => Arc::new(HandoffSpawner),
    }
}
