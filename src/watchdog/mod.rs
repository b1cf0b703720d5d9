//! Stale-role watchdog.
//!
//! A sweep looks at the one role a run may have in `running` and, if it started longer ago
//! than the threshold, fails it with `StaleTimeout` and halts the flow. The write is a
//! compare-and-swap at the version the sweep read. If the orchestrator got there first the
//! swap conflicts, the sweep re-reads, and it only writes again if the same role is still
//! running and still stale. A role the orchestrator completed is never touched.

use crate::errors::{OrchestratorError, StoreError};
use crate::machine;
use crate::manifest::{Actor, FailureReason, FlowState, ManifestStore, Mutation, RunManifest};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// The run is not `running`; nothing to watch.
    Inactive { flow_state: FlowState },
    /// The run is `running` but no role is.
    Idle,
    Healthy { role: String, elapsed_minutes: i64 },
    /// The role was failed by this sweep.
    Stale { role: String, elapsed_minutes: i64 },
    /// The role looked stale but another writer settled it first.
    Settled { role: String },
}

impl SweepOutcome {
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

pub fn sweep(
    store: &ManifestStore,
    run_id: &str,
    threshold_minutes: u64,
) -> Result<SweepOutcome, OrchestratorError> {
    sweep_at(store, run_id, threshold_minutes, Utc::now())
}

/// Sweep as if the current time were `now`.
pub fn sweep_at(
    store: &ManifestStore,
    run_id: &str,
    threshold_minutes: u64,
    now: DateTime<Utc>,
) -> Result<SweepOutcome, OrchestratorError> {
    let manifest = store.load(run_id)?;
    if manifest.flow_state != FlowState::Running {
        tracing::debug!(run_id = %run_id, flow = %manifest.flow_state, "run not running, skipping");
        return Ok(SweepOutcome::Inactive {
            flow_state: manifest.flow_state,
        });
    }

    let Some((role, elapsed)) = stale_role(&manifest, threshold_minutes, now) else {
        return Ok(match manifest.running_role() {
            Some(running) => SweepOutcome::Healthy {
                role: running.role_id.clone(),
                elapsed_minutes: elapsed_since(running.started_at, now).num_minutes(),
            },
            None => SweepOutcome::Idle,
        });
    };

    tracing::warn!(
        run_id = %run_id,
        role = %role,
        elapsed_minutes = elapsed.num_minutes(),
        threshold_minutes,
        "role is stale"
    );

    let first = store.compare_and_swap::<_, OrchestratorError>(
        run_id,
        manifest.version,
        Actor::Watchdog,
        |m| Ok(fail_if_stale(m, &role, threshold_minutes, now)),
    );
    let update = match first {
        Ok(update) => update,
        Err(OrchestratorError::Store(StoreError::VersionConflict { expected, actual, .. })) => {
            tracing::info!(
                run_id = %run_id,
                role = %role,
                expected,
                actual,
                "manifest moved during sweep, re-checking"
            );
            store.update::<_, OrchestratorError>(run_id, Actor::Watchdog, |m| {
                Ok(fail_if_stale(m, &role, threshold_minutes, now))
            })?
        }
        Err(e) => return Err(e),
    };

    if update.is_written() {
        tracing::warn!(run_id = %run_id, role = %role, "stale role failed, flow halted");
        Ok(SweepOutcome::Stale {
            role,
            elapsed_minutes: elapsed.num_minutes(),
        })
    } else {
        tracing::info!(run_id = %run_id, role = %role, "role settled before the sweep could fail it");
        Ok(SweepOutcome::Settled { role })
    }
}

/// Sweep every run under the store. Per-run errors are returned alongside the run id.
pub fn sweep_all(
    store: &ManifestStore,
    threshold_minutes: u64,
    now: DateTime<Utc>,
) -> Result<Vec<(String, Result<SweepOutcome, OrchestratorError>)>, OrchestratorError> {
    let runs = store.list()?;
    Ok(runs
        .into_iter()
        .filter(|m| m.flow_state == FlowState::Running)
        .map(|m| {
            let outcome = sweep_at(store, &m.run_id, threshold_minutes, now);
            (m.run_id, outcome)
        })
        .collect())
}

fn elapsed_since(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    started_at.map(|s| now - s).unwrap_or_else(Duration::zero)
}

fn stale_role(
    manifest: &RunManifest,
    threshold_minutes: u64,
    now: DateTime<Utc>,
) -> Option<(String, Duration)> {
    let running = manifest.running_role()?;
    let elapsed = elapsed_since(running.started_at, now);
    let threshold = i64::try_from(threshold_minutes)
        .ok()
        .and_then(Duration::try_minutes)
        .unwrap_or(Duration::MAX);
    (elapsed > threshold).then(|| (running.role_id.clone(), elapsed))
}

fn fail_if_stale(
    manifest: &RunManifest,
    role_id: &str,
    threshold_minutes: u64,
    now: DateTime<Utc>,
) -> Option<Mutation> {
    let (stale, elapsed) = stale_role(manifest, threshold_minutes, now)?;
    if stale != role_id {
        return None;
    }
    machine::role_failure(
        manifest,
        role_id,
        FailureReason::StaleTimeout {
            elapsed_minutes: elapsed.num_minutes(),
            threshold_minutes,
        },
        BTreeSet::new(),
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Change;
    use crate::manifest::{FailureKind, RoleSeed, RoleState};
    use tempfile::tempdir;

    fn seeds() -> Vec<RoleSeed> {
        ["architect", "builder"]
            .iter()
            .map(|id| RoleSeed {
                role_id: id.to_string(),
                deliverable: format!("{}.md", id),
                required_outputs: [format!("{}.md", id)].into_iter().collect(),
            })
            .collect()
    }

    fn running_run(store: &ManifestStore, started_at: DateTime<Utc>) {
        store
            .create(RunManifest::new("run-1", "objective", seeds()), Actor::Operator)
            .unwrap();
        let mutation = Mutation::new("start", "")
            .with(Change::flow(FlowState::Created, FlowState::Pending))
            .with(Change::flow(FlowState::Pending, FlowState::Running))
            .with(Change::RoleStarted {
                role_id: "architect".to_string(),
                at: started_at,
            });
        store
            .update::<_, OrchestratorError>("run-1", Actor::Orchestrator, |_| Ok(Some(mutation.clone())))
            .unwrap();
    }

    #[test]
    fn test_created_run_is_inactive() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        store
            .create(RunManifest::new("run-1", "objective", seeds()), Actor::Operator)
            .unwrap();
        assert_eq!(
            sweep(&store, "run-1", 60).unwrap(),
            SweepOutcome::Inactive {
                flow_state: FlowState::Created
            }
        );
    }

    #[test]
    fn test_fresh_role_is_healthy() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let started = Utc::now();
        running_run(&store, started);

        let outcome = sweep_at(&store, "run-1", 60, started + Duration::minutes(30)).unwrap();
        assert_eq!(
            outcome,
            SweepOutcome::Healthy {
                role: "architect".to_string(),
                elapsed_minutes: 30
            }
        );
        assert_eq!(store.load("run-1").unwrap().version, 2);
    }

    #[test]
    fn test_exactly_at_threshold_is_not_stale() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let started = Utc::now();
        running_run(&store, started);
        let outcome = sweep_at(&store, "run-1", 60, started + Duration::minutes(60)).unwrap();
        assert!(!outcome.is_stale());
    }

    #[test]
    fn test_stale_role_fails_and_halts_flow() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let started = Utc::now();
        running_run(&store, started);

        let outcome = sweep_at(&store, "run-1", 60, started + Duration::minutes(61)).unwrap();
        assert_eq!(
            outcome,
            SweepOutcome::Stale {
                role: "architect".to_string(),
                elapsed_minutes: 61
            }
        );

        let manifest = store.load("run-1").unwrap();
        assert_eq!(manifest.flow_state, FlowState::Failed);
        let role = manifest.role("architect").unwrap();
        assert_eq!(role.state, RoleState::Failed);
        assert!(matches!(
            role.failure_reason,
            Some(FailureReason::StaleTimeout {
                elapsed_minutes: 61,
                threshold_minutes: 60
            })
        ));
        assert_eq!(manifest.failure.as_ref().unwrap().kind, FailureKind::StaleTimeout);
        assert_eq!(manifest.role("builder").unwrap().state, RoleState::Pending);

        let log = store.read_log("run-1").unwrap();
        assert_eq!(log.last().unwrap().actor, Actor::Watchdog);
    }

    #[test]
    fn test_second_sweep_is_a_no_op() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let started = Utc::now();
        running_run(&store, started);
        let later = started + Duration::minutes(90);
        sweep_at(&store, "run-1", 60, later).unwrap();
        let version = store.load("run-1").unwrap().version;

        assert_eq!(
            sweep_at(&store, "run-1", 60, later).unwrap(),
            SweepOutcome::Inactive {
                flow_state: FlowState::Failed
            }
        );
        assert_eq!(store.load("run-1").unwrap().version, version);
    }

    #[test]
    fn test_completed_role_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let started = Utc::now();
        running_run(&store, started);
        let stale_view = store.load("run-1").unwrap();

        store
            .update::<_, OrchestratorError>("run-1", Actor::Orchestrator, |_| {
                Ok(Some(Mutation::new("role_completed", "").with(Change::RoleCompleted {
                    role_id: "architect".to_string(),
                    at: Utc::now(),
                    observed_outputs: ["architect.md".to_string()].into_iter().collect(),
                })))
            })
            .unwrap();

        // What the sweep would do with its stale read: the swap must conflict, and the
        // re-check must decline.
        let conflict = store.compare_and_swap::<_, OrchestratorError>(
            "run-1",
            stale_view.version,
            Actor::Watchdog,
            |m| Ok(fail_if_stale(m, "architect", 60, started + Duration::minutes(61))),
        );
        assert!(matches!(
            conflict,
            Err(OrchestratorError::Store(StoreError::VersionConflict { .. }))
        ));
        let recheck = store
            .update::<_, OrchestratorError>("run-1", Actor::Watchdog, |m| {
                Ok(fail_if_stale(m, "architect", 60, started + Duration::minutes(61)))
            })
            .unwrap();
        assert!(!recheck.is_written());

        let manifest = store.load("run-1").unwrap();
        assert_eq!(manifest.role("architect").unwrap().state, RoleState::Completed);
        assert_eq!(manifest.flow_state, FlowState::Running);
    }

    #[test]
    fn test_sweep_all_only_visits_running_runs() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let started = Utc::now();
        running_run(&store, started);
        store
            .create(RunManifest::new("run-2", "objective", seeds()), Actor::Operator)
            .unwrap();

        let results = sweep_all(&store, 60, started + Duration::minutes(120)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "run-1");
        assert!(results[0].1.as_ref().unwrap().is_stale());
    }

    #[test]
    fn test_unknown_run() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        assert!(matches!(
            sweep(&store, "nope", 60),
            Err(OrchestratorError::Store(StoreError::NotFound { .. }))
        ));
    }
}
