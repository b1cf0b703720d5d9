//! Typed error hierarchy for the baton orchestrator.
//!
//! Three enums cover the three layers:
//! - `TransitionError`: a state machine rejected an edge (pure, no I/O)
//! - `StoreError`: manifest persistence, locking and optimistic-concurrency failures
//! - `OrchestratorError`: orchestration, watchdog and archive operations
//!
//! Role and gate failures are not errors: they are recorded in the manifest as
//! [`crate::manifest::FailureReason`] / [`crate::manifest::RunFailure`] and the call that
//! recorded them returns normally.

use crate::manifest::{FlowState, RoleState};
use std::path::PathBuf;
use thiserror::Error;

/// A state edge outside the allowed graph, or a guard on an allowed edge that does not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid flow transition {from} -> {to}")]
    InvalidFlowTransition { from: FlowState, to: FlowState },

    #[error("invalid transition for role {role}: {from} -> {to}")]
    InvalidRoleTransition {
        role: String,
        from: RoleState,
        to: RoleState,
    },

    #[error("role {role} has not produced required outputs: {}", missing.join(", "))]
    CompletionContractUnmet { role: String, missing: Vec<String> },

    #[error("cannot start role {role}: role {running} is already running")]
    RoleAlreadyRunning { role: String, running: String },

    #[error("cannot start role {role} before role {blocked_by} has completed")]
    OutOfOrder { role: String, blocked_by: String },

    #[error("flow is {state}; roles and gates only change while the flow is running")]
    FlowNotRunning { state: FlowState },

    #[error("unknown role {role}")]
    UnknownRole { role: String },

    #[error("cannot finish the flow while roles are unfinished: {}", unfinished.join(", "))]
    RolesIncomplete { unfinished: Vec<String> },

    #[error("cannot complete the flow: gate {gate} did not pass")]
    GateNotPassed { gate: String },

    #[error("cannot finish the flow while role {role} is running")]
    RoleStillRunning { role: String },

    #[error("a run is created exactly once")]
    AlreadyCreated,
}

/// Errors from the manifest store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {run_id} not found")]
    NotFound { run_id: String },

    #[error("run {run_id} already exists")]
    AlreadyExists { run_id: String },

    #[error("version conflict on run {run_id}: expected {expected}, found {actual}")]
    VersionConflict {
        run_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid run id '{run_id}': use letters, digits, '-', '_' or '.'")]
    InvalidRunId { run_id: String },

    #[error("log for run {run_id} is unusable: {detail}")]
    CorruptLog { run_id: String, detail: String },

    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize run {run_id}: {source}")]
    Serialize {
        run_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl StoreError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Errors from orchestration-level operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("run {run_id} is {state}; it admits no further orchestration")]
    TerminalRun { run_id: String, state: FlowState },

    #[error("missing configuration: {0}")]
    MissingConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<TransitionError> for OrchestratorError {
    fn from(err: TransitionError) -> Self {
        Self::Store(StoreError::Transition(err))
    }
}

impl OrchestratorError {
    /// The state machine rejection behind this error, if any.
    pub fn as_transition(&self) -> Option<&TransitionError> {
        match self {
            Self::Store(StoreError::Transition(err)) => Some(err),
            _ => None,
        }
    }
}
