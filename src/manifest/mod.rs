//! The run manifest: the durable record of one run's flow state, role records and gate
//! results.
//!
//! A manifest is only ever mutated through [`ManifestStore::compare_and_swap`] (or its
//! retrying wrapper [`ManifestStore::update`]); the in-memory value is a snapshot, never a
//! shared handle.

pub mod log;
pub mod store;

pub use log::{Actor, LogEntry, Mutation, RunLog, replay};
pub use store::{ManifestStore, Update};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Run-level lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Created,
    Pending,
    Running,
    Completed,
    Failed,
    Archived,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Archived => "archived",
        }
    }

    /// No outgoing edges at all. Only `archived`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived)
    }

    /// The run can no longer be orchestrated (`completed`, `failed` or `archived`).
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Archived)
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single role within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RoleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a role was driven to `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The worker claimed completion but required artifacts were absent.
    OutputsMissing { missing: Vec<String> },
    /// The watchdog found the role running past the stale threshold.
    StaleTimeout {
        elapsed_minutes: i64,
        threshold_minutes: u64,
    },
    /// The worker itself reported `failed` in its status record.
    WorkerReported { error: Option<String> },
    /// The worker could not be launched.
    SpawnFailed { message: String },
}

impl FailureReason {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::OutputsMissing { .. } => FailureKind::OutputsMissing,
            Self::StaleTimeout { .. } => FailureKind::StaleTimeout,
            Self::WorkerReported { .. } => FailureKind::WorkerReported,
            Self::SpawnFailed { .. } => FailureKind::SpawnFailed,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::OutputsMissing { missing } => {
                format!("required outputs missing: {}", missing.join(", "))
            }
            Self::StaleTimeout {
                elapsed_minutes,
                threshold_minutes,
            } => format!(
                "running for {} minutes, past the {} minute threshold",
                elapsed_minutes, threshold_minutes
            ),
            Self::WorkerReported { error } => match error {
                Some(error) => format!("worker reported failure: {}", error),
                None => "worker reported failure".to_string(),
            },
            Self::SpawnFailed { message } => format!("worker could not be spawned: {}", message),
        }
    }
}

/// Failure category recorded at run level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    OutputsMissing,
    StaleTimeout,
    WorkerReported,
    SpawnFailed,
    GateFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutputsMissing => "OutputsMissing",
            Self::StaleTimeout => "StaleTimeout",
            Self::WorkerReported => "WorkerReported",
            Self::SpawnFailed => "SpawnFailed",
            Self::GateFailure => "GateFailure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in `failed`: the failing role or gate and its diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    /// Role id or gate name.
    pub subject: String,
    pub detail: String,
}

impl RunFailure {
    pub fn for_role(role_id: &str, reason: &FailureReason) -> Self {
        Self {
            kind: reason.kind(),
            subject: role_id.to_string(),
            detail: reason.describe(),
        }
    }

    pub fn for_gate(gate: &GateResult) -> Self {
        Self {
            kind: FailureKind::GateFailure,
            subject: gate.name.clone(),
            detail: gate.captured_output.clone(),
        }
    }
}

/// State of one role in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub role_id: String,
    pub order_index: usize,
    pub state: RoleState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Primary deliverable, relative to the run directory.
    pub deliverable: String,
    pub required_outputs: BTreeSet<String>,
    #[serde(default)]
    pub observed_outputs: BTreeSet<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

impl RoleRecord {
    pub fn new(
        role_id: &str,
        order_index: usize,
        deliverable: &str,
        required_outputs: BTreeSet<String>,
    ) -> Self {
        Self {
            role_id: role_id.to_string(),
            order_index,
            state: RoleState::Pending,
            started_at: None,
            ended_at: None,
            deliverable: deliverable.to_string(),
            required_outputs,
            observed_outputs: BTreeSet::new(),
            attempts: 0,
            failure_reason: None,
        }
    }

    /// Required outputs absent from `observed`, in sorted order.
    pub fn missing_outputs(&self, observed: &BTreeSet<String>) -> Vec<String> {
        self.required_outputs.difference(observed).cloned().collect()
    }
}

/// Outcome of one verification gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub passed: bool,
    pub captured_output: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub duration_ms: u64,
    pub ran_at: DateTime<Utc>,
}

/// Input for one role when a manifest is first built.
#[derive(Debug, Clone)]
pub struct RoleSeed {
    pub role_id: String,
    pub deliverable: String,
    pub required_outputs: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    #[serde(default)]
    pub objective: String,
    pub flow_state: FlowState,
    pub roster: Vec<String>,
    pub roles: BTreeMap<String, RoleRecord>,
    #[serde(default)]
    pub gates: Vec<GateResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunManifest {
    /// Build an unsaved manifest in state `created`. The store assigns version 1 on create.
    pub fn new(run_id: &str, objective: &str, seeds: Vec<RoleSeed>) -> Self {
        let now = Utc::now();
        let roster: Vec<String> = seeds.iter().map(|s| s.role_id.clone()).collect();
        let roles = seeds
            .into_iter()
            .enumerate()
            .map(|(index, seed)| {
                let record = RoleRecord::new(
                    &seed.role_id,
                    index,
                    &seed.deliverable,
                    seed.required_outputs,
                );
                (seed.role_id, record)
            })
            .collect();

        Self {
            run_id: run_id.to_string(),
            objective: objective.to_string(),
            flow_state: FlowState::Created,
            roster,
            roles,
            gates: Vec::new(),
            failure: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn role(&self, role_id: &str) -> Option<&RoleRecord> {
        self.roles.get(role_id)
    }

    /// Role records in roster order.
    pub fn ordered_roles(&self) -> impl Iterator<Item = &RoleRecord> {
        self.roster.iter().filter_map(|id| self.roles.get(id))
    }

    pub fn running_role(&self) -> Option<&RoleRecord> {
        self.ordered_roles().find(|r| r.state == RoleState::Running)
    }

    /// Lowest-order role still `pending`.
    pub fn next_pending_role(&self) -> Option<&RoleRecord> {
        self.ordered_roles().find(|r| r.state == RoleState::Pending)
    }

    pub fn failed_role(&self) -> Option<&RoleRecord> {
        self.ordered_roles().find(|r| r.state == RoleState::Failed)
    }

    pub fn all_roles_completed(&self) -> bool {
        self.ordered_roles().all(|r| r.state == RoleState::Completed)
    }

    pub fn count_in(&self, state: RoleState) -> usize {
        self.roles.values().filter(|r| r.state == state).count()
    }
}
