//! The orchestrator loop.
//!
//! One call to [`Orchestrator::orchestrate`] drives a run as far as it can: it starts the next
//! pending role, waits for its worker, verifies the completion contract, and repeats until
//! every role has completed (then runs the gates) or one has failed. If a role is still
//! running when the role timeout elapses, the call returns [`RunOutcome::Suspended`] and the
//! run stays `running`; a later call adopts the running role instead of respawning it, and
//! the watchdog remains the recovery path for a worker that never reports.
//!
//! Every write goes through [`ManifestStore::update`], whose mutators re-check their
//! preconditions against the freshly read manifest. A watchdog that fails a role between two
//! polls therefore wins cleanly: the orchestrator sees the role is no longer running and stops.

use super::RunObserver;
use super::spawner::{SpawnRequest, WorkerSpawner};
use crate::config::Config;
use crate::errors::OrchestratorError;
use crate::gates::{GateRunner, GateSpec};
use crate::machine::{self, Change};
use crate::mailbox::{Mailbox, WorkerState};
use crate::manifest::{
    Actor, FailureReason, FlowState, ManifestStore, Mutation, RoleState, RunFailure, RunManifest,
};
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub poll_interval: Duration,
    /// Longest a single call waits on one role before returning `Suspended`.
    pub role_timeout: Duration,
    pub gates: Vec<GateSpec>,
}

impl OrchestratorOptions {
    pub fn from_config(config: &Config) -> Result<Self, OrchestratorError> {
        Ok(Self {
            poll_interval: config.poll_interval(),
            role_timeout: config.role_timeout(),
            gates: config.gates()?,
        })
    }
}

/// How an `orchestrate` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every role completed and every gate passed.
    Completed { manifest: RunManifest },
    /// A role or gate failed; `manifest.failure` says which.
    Failed { manifest: RunManifest },
    /// `role` was still running when the role timeout elapsed.
    Suspended { manifest: RunManifest, role: String },
}

impl RunOutcome {
    pub fn manifest(&self) -> &RunManifest {
        match self {
            Self::Completed { manifest }
            | Self::Failed { manifest }
            | Self::Suspended { manifest, .. } => manifest,
        }
    }
}

enum Wait {
    Settled,
    TimedOut,
}

pub struct Orchestrator {
    store: ManifestStore,
    agents_dir: PathBuf,
    gate_runner: GateRunner,
    spawner: Arc<dyn WorkerSpawner>,
    observer: Arc<dyn RunObserver>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        store: ManifestStore,
        project_dir: &Path,
        agents_dir: &Path,
        spawner: Arc<dyn WorkerSpawner>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            agents_dir: agents_dir.to_path_buf(),
            gate_runner: GateRunner::new(project_dir),
            spawner,
            observer: Arc::new(super::NoopObserver),
            options,
        }
    }

    /// Build from runtime config. Fails if no gate list is configured.
    pub fn from_config(
        config: &Config,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Result<Self, OrchestratorError> {
        Ok(Self::new(
            config.store(),
            &config.project_dir,
            &config.agents_dir,
            spawner,
            OrchestratorOptions::from_config(config)?,
        ))
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn mailbox(&self, run_id: &str, role_id: &str) -> Mailbox {
        Mailbox::new(&self.agents_dir, &self.store.run_dir(run_id), run_id, role_id)
    }

    pub async fn orchestrate(&self, run_id: &str) -> Result<RunOutcome, OrchestratorError> {
        let manifest = self.store.load(run_id)?;
        if manifest.flow_state.is_finished() {
            return Err(OrchestratorError::TerminalRun {
                run_id: run_id.to_string(),
                state: manifest.flow_state,
            });
        }

        tracing::info!(run_id = %run_id, flow = %manifest.flow_state, "orchestrating run");
        self.advance_flow(run_id, FlowState::Created, FlowState::Pending)?;
        self.advance_flow(run_id, FlowState::Pending, FlowState::Running)?;

        loop {
            let manifest = self.store.load(run_id)?;
            match manifest.flow_state {
                FlowState::Running => {}
                FlowState::Completed => return Ok(RunOutcome::Completed { manifest }),
                FlowState::Failed => return Ok(RunOutcome::Failed { manifest }),
                state => {
                    return Err(OrchestratorError::TerminalRun {
                        run_id: run_id.to_string(),
                        state,
                    });
                }
            }

            if let Some(running) = manifest.running_role() {
                let role_id = running.role_id.clone();
                match self.await_role(run_id, &role_id).await? {
                    Wait::Settled => continue,
                    Wait::TimedOut => {
                        tracing::warn!(
                            run_id = %run_id,
                            role = %role_id,
                            timeout_secs = self.options.role_timeout.as_secs(),
                            "role still running, leaving it to a later call or the watchdog"
                        );
                        let manifest = self.store.load(run_id)?;
                        return Ok(RunOutcome::Suspended {
                            manifest,
                            role: role_id,
                        });
                    }
                }
            }

            if let Some(failed) = manifest.failed_role() {
                // A failed role always fails the flow in the same write; this only repairs
                // manifests written by something else.
                let role_id = failed.role_id.clone();
                self.fail_flow_for(run_id, &role_id)?;
                continue;
            }

            if let Some(next) = manifest.next_pending_role() {
                let role_id = next.role_id.clone();
                self.start_role(run_id, &role_id).await?;
                continue;
            }

            return self.finish_with_gates(run_id).await;
        }
    }

    fn advance_flow(
        &self,
        run_id: &str,
        from: FlowState,
        to: FlowState,
    ) -> Result<(), OrchestratorError> {
        let update = self
            .store
            .update::<_, OrchestratorError>(run_id, Actor::Orchestrator, |m| {
                if m.flow_state != from {
                    return Ok(None);
                }
                Ok(Some(
                    Mutation::new("flow_changed", format!("{} -> {}", from, to))
                        .with(Change::flow(from, to)),
                ))
            })?;
        if update.is_written() {
            tracing::info!(run_id = %run_id, from = %from, to = %to, "flow transition");
            self.observer.flow_changed(run_id, from, to);
        }
        Ok(())
    }

    async fn start_role(&self, run_id: &str, role_id: &str) -> Result<(), OrchestratorError> {
        let at = Utc::now();
        let update = self
            .store
            .update::<_, OrchestratorError>(run_id, Actor::Orchestrator, |m| {
                if m.flow_state != FlowState::Running || m.running_role().is_some() {
                    return Ok(None);
                }
                match m.next_pending_role() {
                    Some(next) if next.role_id == role_id => Ok(Some(
                        Mutation::new("role_started", format!("role {} started", role_id)).with(
                            Change::RoleStarted {
                                role_id: role_id.to_string(),
                                at,
                            },
                        ),
                    )),
                    _ => Ok(None),
                }
            })?;
        if !update.is_written() {
            return Ok(());
        }

        let manifest = update.into_manifest();
        let Some(record) = manifest.role(role_id) else {
            return Ok(());
        };
        tracing::info!(run_id = %run_id, role = %role_id, attempt = record.attempts, "role started");
        self.observer.role_started(record);

        let mailbox = self.mailbox(run_id, role_id);
        let spawned = match mailbox.prepare(record, &manifest.objective) {
            Ok(()) => {
                let request = SpawnRequest::new(run_id, &mailbox, record);
                self.spawner.spawn(&request).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = spawned {
            tracing::error!(run_id = %run_id, role = %role_id, error = %e, "failed to spawn worker");
            let reason = FailureReason::SpawnFailed {
                message: format!("{:#}", e),
            };
            self.fail_role(run_id, role_id, reason, None)?;
        }
        Ok(())
    }

    async fn await_role(&self, run_id: &str, role_id: &str) -> Result<Wait, OrchestratorError> {
        let mailbox = self.mailbox(run_id, role_id);
        let started = Instant::now();
        let deadline = started + self.options.role_timeout;

        loop {
            let manifest = self.store.load(run_id)?;
            let still_running = manifest
                .role(role_id)
                .is_some_and(|r| r.state == RoleState::Running)
                && manifest.flow_state == FlowState::Running;
            if !still_running {
                return Ok(Wait::Settled);
            }

            if let Some(status) = mailbox.read_status()? {
                match status.state {
                    WorkerState::Completed => {
                        self.settle_claimed_completion(run_id, role_id, &mailbox)?;
                        return Ok(Wait::Settled);
                    }
                    WorkerState::Failed => {
                        tracing::warn!(run_id = %run_id, role = %role_id, error = ?status.error, "worker reported failure");
                        let reason = FailureReason::WorkerReported {
                            error: status.error.clone(),
                        };
                        self.fail_role(run_id, role_id, reason, Some(&mailbox))?;
                        return Ok(Wait::Settled);
                    }
                    WorkerState::Pending | WorkerState::Running => {}
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Wait::TimedOut);
            }
            self.observer.role_waiting(role_id, started.elapsed());
            tokio::time::sleep(self.options.poll_interval.min(deadline - now)).await;
        }
    }

    /// The worker says it is done. Check the artifacts ourselves before believing it.
    fn settle_claimed_completion(
        &self,
        run_id: &str,
        role_id: &str,
        mailbox: &Mailbox,
    ) -> Result<(), OrchestratorError> {
        let update = self
            .store
            .update::<_, OrchestratorError>(run_id, Actor::Orchestrator, |m| {
                let Some(record) = m.role(role_id) else {
                    return Ok(None);
                };
                if record.state != RoleState::Running || m.flow_state != FlowState::Running {
                    return Ok(None);
                }
                let observed = mailbox.observe_outputs(&record.required_outputs);
                let missing = record.missing_outputs(&observed);
                let at = Utc::now();
                if missing.is_empty() {
                    Ok(Some(
                        Mutation::new("role_completed", format!("role {} completed", role_id))
                            .with(Change::RoleCompleted {
                                role_id: role_id.to_string(),
                                at,
                                observed_outputs: observed,
                            }),
                    ))
                } else {
                    tracing::warn!(
                        run_id = %run_id,
                        role = %role_id,
                        missing = %missing.join(", "),
                        "worker claimed completion without required outputs"
                    );
                    Ok(machine::role_failure(
                        m,
                        role_id,
                        FailureReason::OutputsMissing { missing },
                        observed,
                        at,
                    ))
                }
            })?;

        if update.is_written()
            && let Some(record) = update.manifest().role(role_id)
        {
            tracing::info!(run_id = %run_id, role = %role_id, state = %record.state, "role settled");
            self.observer.role_finished(record);
        }
        Ok(())
    }

    fn fail_role(
        &self,
        run_id: &str,
        role_id: &str,
        reason: FailureReason,
        mailbox: Option<&Mailbox>,
    ) -> Result<(), OrchestratorError> {
        let update = self
            .store
            .update::<_, OrchestratorError>(run_id, Actor::Orchestrator, |m| {
                let observed = match (mailbox, m.role(role_id)) {
                    (Some(mailbox), Some(record)) => mailbox.observe_outputs(&record.required_outputs),
                    _ => BTreeSet::new(),
                };
                Ok(machine::role_failure(
                    m,
                    role_id,
                    reason.clone(),
                    observed,
                    Utc::now(),
                ))
            })?;
        if update.is_written()
            && let Some(record) = update.manifest().role(role_id)
        {
            tracing::warn!(run_id = %run_id, role = %role_id, reason = %reason.describe(), "role failed");
            self.observer.role_finished(record);
            self.observer
                .flow_changed(run_id, FlowState::Running, FlowState::Failed);
        }
        Ok(())
    }

    fn fail_flow_for(&self, run_id: &str, role_id: &str) -> Result<(), OrchestratorError> {
        self.store
            .update::<_, OrchestratorError>(run_id, Actor::Orchestrator, |m| {
                if m.flow_state != FlowState::Running || m.running_role().is_some() {
                    return Ok(None);
                }
                let Some(record) = m.role(role_id) else {
                    return Ok(None);
                };
                let reason = record.failure_reason.clone().unwrap_or(FailureReason::WorkerReported {
                    error: None,
                });
                Ok(Some(
                    Mutation::new("flow_changed", format!("role {} failed", role_id)).with(
                        Change::Flow {
                            from: FlowState::Running,
                            to: FlowState::Failed,
                            failure: Some(RunFailure::for_role(role_id, &reason)),
                        },
                    ),
                ))
            })?;
        Ok(())
    }

    /// Run the gates once and record the results together with the flow's final state.
    async fn finish_with_gates(&self, run_id: &str) -> Result<RunOutcome, OrchestratorError> {
        let gates = &self.options.gates;
        tracing::info!(run_id = %run_id, count = gates.len(), "all roles completed, running gates");
        self.observer.gates_started(gates.len());

        let results = self.gate_runner.run_gates(run_id, gates).await;
        for result in &results {
            self.observer.gate_finished(result);
        }

        let update = self
            .store
            .update::<_, OrchestratorError>(run_id, Actor::GateRunner, |m| {
                if m.flow_state != FlowState::Running || !m.all_roles_completed() {
                    return Ok(None);
                }
                let failed = results.iter().find(|r| !r.passed);
                let mut mutation = match failed {
                    Some(gate) => Mutation::new("gate_failed", format!("gate {} failed", gate.name)),
                    None => Mutation::new(
                        "gates_passed",
                        format!("{} gate(s) passed", results.len()),
                    ),
                };
                for result in &results {
                    mutation.push(Change::GateRecorded {
                        result: result.clone(),
                    });
                }
                mutation.push(match failed {
                    Some(gate) => Change::Flow {
                        from: FlowState::Running,
                        to: FlowState::Failed,
                        failure: Some(RunFailure::for_gate(gate)),
                    },
                    None => Change::flow(FlowState::Running, FlowState::Completed),
                });
                Ok(Some(mutation))
            })?;

        let manifest = update.into_manifest();
        match manifest.flow_state {
            FlowState::Completed => {
                tracing::info!(run_id = %run_id, "run completed");
                self.observer
                    .flow_changed(run_id, FlowState::Running, FlowState::Completed);
                Ok(RunOutcome::Completed { manifest })
            }
            FlowState::Failed => {
                self.observer
                    .flow_changed(run_id, FlowState::Running, FlowState::Failed);
                Ok(RunOutcome::Failed { manifest })
            }
            state => Err(OrchestratorError::TerminalRun {
                run_id: run_id.to_string(),
                state,
            }),
        }
    }
}
