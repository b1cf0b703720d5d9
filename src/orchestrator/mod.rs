pub mod lifecycle;
pub mod runner;
pub mod spawner;

pub use lifecycle::{CreateRequest, archive_run, create_run, default_run_id};
pub use runner::{Orchestrator, OrchestratorOptions, RunOutcome};
pub use spawner::{
    CommandSpawner, HandoffSpawner, SpawnRequest, WorkerSpawner, spawner_from_config,
};

use crate::manifest::{FlowState, GateResult, RoleRecord};
use std::time::Duration;

/// Progress callbacks from the orchestrator loop. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn flow_changed(&self, _run_id: &str, _from: FlowState, _to: FlowState) {}
    fn role_started(&self, _record: &RoleRecord) {}
    fn role_waiting(&self, _role_id: &str, _elapsed: Duration) {}
    fn role_finished(&self, _record: &RoleRecord) {}
    fn gates_started(&self, _count: usize) {}
    fn gate_finished(&self, _result: &GateResult) {}
}

pub struct NoopObserver;

impl RunObserver for NoopObserver {}
