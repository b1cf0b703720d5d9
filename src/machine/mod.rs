//! Flow and role state machines, and the manifest-level rules that tie them together.
//!
//! Every manifest write is expressed as a list of [`Change`]s. [`apply`] validates each
//! change against the flow graph, the role graph, and the run-wide scheduling rules:
//! at most one running role, roles start strictly in roster order, and a role completes
//! only when its completion contract holds. The same function is used when writing and
//! when replaying the log, so a replayed manifest is always one the machines accepted.

pub mod flow;
pub mod role;

use crate::errors::TransitionError;
use crate::manifest::{
    FailureReason, FlowState, GateResult, Mutation, RoleRecord, RoleState, RunFailure,
    RunManifest,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One atomic edit to a manifest, as recorded in the run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    /// Initial snapshot. Only valid as the first log entry.
    Created { manifest: Box<RunManifest> },
    Flow {
        from: FlowState,
        to: FlowState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<RunFailure>,
    },
    RoleStarted {
        role_id: String,
        at: DateTime<Utc>,
    },
    RoleCompleted {
        role_id: String,
        at: DateTime<Utc>,
        observed_outputs: BTreeSet<String>,
    },
    RoleFailed {
        role_id: String,
        at: DateTime<Utc>,
        observed_outputs: BTreeSet<String>,
        reason: FailureReason,
    },
    GateRecorded { result: GateResult },
}

impl Change {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Flow { .. } => "flow",
            Self::RoleStarted { .. } => "role_started",
            Self::RoleCompleted { .. } => "role_completed",
            Self::RoleFailed { .. } => "role_failed",
            Self::GateRecorded { .. } => "gate_recorded",
        }
    }

    pub fn flow(from: FlowState, to: FlowState) -> Self {
        Self::Flow {
            from,
            to,
            failure: None,
        }
    }
}

/// Validate `change` against `manifest` and apply it in place.
///
/// On error the manifest is left unchanged.
pub fn apply(manifest: &mut RunManifest, change: &Change) -> Result<(), TransitionError> {
    match change {
        Change::Created { .. } => Err(TransitionError::AlreadyCreated),
        Change::Flow { from, to, failure } => {
            if manifest.flow_state != *from {
                return Err(TransitionError::InvalidFlowTransition {
                    from: manifest.flow_state,
                    to: *to,
                });
            }
            let mut next = manifest.clone();
            flow::apply(&mut next, *to, failure.as_ref())?;
            *manifest = next;
            Ok(())
        }
        Change::RoleStarted { role_id, at } => {
            require_running_flow(manifest)?;
            let record = lookup(manifest, role_id)?;
            let next = role::transition(record, RoleState::Running, *at, None)?;

            if let Some(running) = manifest.running_role() {
                return Err(TransitionError::RoleAlreadyRunning {
                    role: role_id.clone(),
                    running: running.role_id.clone(),
                });
            }
            if let Some(blocker) = manifest
                .ordered_roles()
                .find(|r| r.order_index < record.order_index && r.state != RoleState::Completed)
            {
                return Err(TransitionError::OutOfOrder {
                    role: role_id.clone(),
                    blocked_by: blocker.role_id.clone(),
                });
            }

            manifest.roles.insert(role_id.clone(), next);
            Ok(())
        }
        Change::RoleCompleted {
            role_id,
            at,
            observed_outputs,
        } => {
            require_running_flow(manifest)?;
            let record = lookup(manifest, role_id)?;
            let next = role::transition(record, RoleState::Completed, *at, Some(observed_outputs))?;
            manifest.roles.insert(role_id.clone(), next);
            Ok(())
        }
        Change::RoleFailed {
            role_id,
            at,
            observed_outputs,
            reason,
        } => {
            require_running_flow(manifest)?;
            let record = lookup(manifest, role_id)?;
            let mut next = role::transition(record, RoleState::Failed, *at, Some(observed_outputs))?;
            next.failure_reason = Some(reason.clone());
            manifest.roles.insert(role_id.clone(), next);
            Ok(())
        }
        Change::GateRecorded { result } => {
            require_running_flow(manifest)?;
            let unfinished: Vec<String> = manifest
                .ordered_roles()
                .filter(|r| r.state != RoleState::Completed)
                .map(|r| r.role_id.clone())
                .collect();
            if !unfinished.is_empty() {
                return Err(TransitionError::RolesIncomplete { unfinished });
            }
            manifest.gates.push(result.clone());
            Ok(())
        }
    }
}

/// Apply every change in order, all or nothing.
pub fn apply_all(manifest: &mut RunManifest, changes: &[Change]) -> Result<(), TransitionError> {
    let mut next = manifest.clone();
    for change in changes {
        apply(&mut next, change)?;
    }
    *manifest = next;
    Ok(())
}

/// Build the mutation that fails a running role and halts the flow with it.
///
/// Returns `None` when the role is no longer running (another writer settled it first).
pub fn role_failure(
    manifest: &RunManifest,
    role_id: &str,
    reason: FailureReason,
    observed_outputs: BTreeSet<String>,
    at: DateTime<Utc>,
) -> Option<Mutation> {
    let record = manifest.role(role_id)?;
    if record.state != RoleState::Running || manifest.flow_state != FlowState::Running {
        return None;
    }
    let failure = RunFailure::for_role(role_id, &reason);
    let detail = format!("role {} failed ({}): {}", role_id, failure.kind, failure.detail);
    Some(
        Mutation::new("role_failed", detail)
            .with(Change::RoleFailed {
                role_id: role_id.to_string(),
                at,
                observed_outputs,
                reason,
            })
            .with(Change::Flow {
                from: FlowState::Running,
                to: FlowState::Failed,
                failure: Some(failure),
            }),
    )
}

fn require_running_flow(manifest: &RunManifest) -> Result<(), TransitionError> {
    if manifest.flow_state != FlowState::Running {
        return Err(TransitionError::FlowNotRunning {
            state: manifest.flow_state,
        });
    }
    Ok(())
}

fn lookup<'a>(manifest: &'a RunManifest, role_id: &str) -> Result<&'a RoleRecord, TransitionError> {
    manifest
        .role(role_id)
        .ok_or_else(|| TransitionError::UnknownRole {
            role: role_id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::RoleSeed;
    use proptest::prelude::*;

    const ROLES: [&str; 4] = ["architect", "builder", "qa", "docs"];

    fn running_manifest() -> RunManifest {
        let seeds = ROLES
            .iter()
            .map(|id| RoleSeed {
                role_id: id.to_string(),
                deliverable: format!("{}.md", id),
                required_outputs: [format!("{}.md", id)].into_iter().collect(),
            })
            .collect();
        let mut manifest = RunManifest::new("run-1", "objective", seeds);
        manifest.flow_state = FlowState::Running;
        manifest
    }

    fn outputs_of(id: &str) -> BTreeSet<String> {
        [format!("{}.md", id)].into_iter().collect()
    }

    fn start(id: &str) -> Change {
        Change::RoleStarted {
            role_id: id.to_string(),
            at: Utc::now(),
        }
    }

    fn complete(id: &str) -> Change {
        Change::RoleCompleted {
            role_id: id.to_string(),
            at: Utc::now(),
            observed_outputs: outputs_of(id),
        }
    }

    #[test]
    fn test_roles_start_in_roster_order() {
        let mut manifest = running_manifest();
        let err = apply(&mut manifest, &start("builder")).unwrap_err();
        assert_eq!(
            err,
            TransitionError::OutOfOrder {
                role: "builder".to_string(),
                blocked_by: "architect".to_string()
            }
        );
        apply(&mut manifest, &start("architect")).unwrap();
        apply(&mut manifest, &complete("architect")).unwrap();
        apply(&mut manifest, &start("builder")).unwrap();
    }

    #[test]
    fn test_second_running_role_rejected() {
        let mut manifest = running_manifest();
        apply(&mut manifest, &start("architect")).unwrap();
        let err = apply(&mut manifest, &start("builder")).unwrap_err();
        assert!(matches!(err, TransitionError::RoleAlreadyRunning { .. }));
        assert_eq!(manifest.count_in(RoleState::Running), 1);
    }

    #[test]
    fn test_roles_frozen_outside_running_flow() {
        let mut manifest = running_manifest();
        manifest.flow_state = FlowState::Pending;
        let err = apply(&mut manifest, &start("architect")).unwrap_err();
        assert_eq!(
            err,
            TransitionError::FlowNotRunning {
                state: FlowState::Pending
            }
        );
    }

    #[test]
    fn test_flow_change_checks_from_state() {
        let mut manifest = running_manifest();
        let err = apply(&mut manifest, &Change::flow(FlowState::Created, FlowState::Pending)).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidFlowTransition { .. }));
    }

    #[test]
    fn test_created_change_cannot_be_applied() {
        let mut manifest = running_manifest();
        let change = Change::Created {
            manifest: Box::new(manifest.clone()),
        };
        assert_eq!(apply(&mut manifest, &change), Err(TransitionError::AlreadyCreated));
    }

    #[test]
    fn test_apply_all_is_atomic() {
        let mut manifest = running_manifest();
        let before = manifest.clone();
        let err = apply_all(&mut manifest, &[start("architect"), start("builder")]);
        assert!(err.is_err());
        assert_eq!(manifest, before);
    }

    #[test]
    fn test_role_failure_fails_role_then_flow() {
        let mut manifest = running_manifest();
        apply(&mut manifest, &start("architect")).unwrap();
        let mutation = role_failure(
            &manifest,
            "architect",
            FailureReason::OutputsMissing {
                missing: vec!["architect.md".to_string()],
            },
            BTreeSet::new(),
            Utc::now(),
        )
        .unwrap();
        apply_all(&mut manifest, &mutation.changes).unwrap();
        assert_eq!(manifest.flow_state, FlowState::Failed);
        assert_eq!(manifest.role("architect").unwrap().state, RoleState::Failed);
        let failure = manifest.failure.unwrap();
        assert_eq!(failure.subject, "architect");
        assert_eq!(failure.kind.as_str(), "OutputsMissing");
    }

    #[test]
    fn test_role_failure_is_none_once_settled() {
        let mut manifest = running_manifest();
        apply(&mut manifest, &start("architect")).unwrap();
        apply(&mut manifest, &complete("architect")).unwrap();
        let reason = FailureReason::StaleTimeout {
            elapsed_minutes: 90,
            threshold_minutes: 60,
        };
        assert!(role_failure(&manifest, "architect", reason, BTreeSet::new(), Utc::now()).is_none());
    }

    #[test]
    fn test_gates_recorded_only_after_all_roles_complete() {
        let mut manifest = running_manifest();
        let gate = Change::GateRecorded {
            result: GateResult {
                name: "build".to_string(),
                passed: true,
                captured_output: String::new(),
                exit_code: Some(0),
                duration_ms: 1,
                ran_at: Utc::now(),
            },
        };
        assert!(matches!(
            apply(&mut manifest, &gate),
            Err(TransitionError::RolesIncomplete { .. })
        ));
        for id in ROLES {
            apply(&mut manifest, &start(id)).unwrap();
            apply(&mut manifest, &complete(id)).unwrap();
        }
        apply(&mut manifest, &gate).unwrap();
        apply(&mut manifest, &Change::flow(FlowState::Running, FlowState::Completed)).unwrap();
        assert_eq!(manifest.flow_state, FlowState::Completed);
    }

    fn role_rank(state: RoleState) -> u8 {
        match state {
            RoleState::Pending => 0,
            RoleState::Running => 1,
            RoleState::Completed | RoleState::Failed => 2,
        }
    }

    fn op_to_change(manifest: &RunManifest, code: u8, index: usize, flag: bool) -> Change {
        let id = ROLES[index % ROLES.len()];
        let at = Utc::now();
        match code % 6 {
            0 => start(id),
            1 => Change::RoleCompleted {
                role_id: id.to_string(),
                at,
                observed_outputs: if flag { outputs_of(id) } else { BTreeSet::new() },
            },
            2 => Change::RoleFailed {
                role_id: id.to_string(),
                at,
                observed_outputs: BTreeSet::new(),
                reason: FailureReason::WorkerReported { error: None },
            },
            3 => {
                let targets = [
                    FlowState::Pending,
                    FlowState::Running,
                    FlowState::Completed,
                    FlowState::Failed,
                    FlowState::Archived,
                ];
                Change::flow(manifest.flow_state, targets[index % targets.len()])
            }
            4 => Change::GateRecorded {
                result: GateResult {
                    name: format!("gate-{}", index),
                    passed: flag,
                    captured_output: String::new(),
                    exit_code: Some(if flag { 0 } else { 1 }),
                    duration_ms: 0,
                    ran_at: at,
                },
            },
            _ => Change::flow(FlowState::Created, FlowState::Pending),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_random_transition_sequences_preserve_invariants(
            ops in prop::collection::vec((0u8..6, 0usize..8, any::<bool>()), 1..60)
        ) {
            let mut manifest = running_manifest();
            manifest.flow_state = FlowState::Created;

            for (code, index, flag) in ops {
                let change = op_to_change(&manifest, code, index, flag);
                let before = manifest.clone();
                if apply(&mut manifest, &change).is_err() {
                    prop_assert_eq!(&manifest, &before);
                    continue;
                }

                // Mutual exclusion.
                prop_assert!(manifest.count_in(RoleState::Running) <= 1);

                for record in manifest.ordered_roles() {
                    let prev = before.role(&record.role_id).unwrap();

                    // Monotonicity; terminal role states never change.
                    prop_assert!(role_rank(record.state) >= role_rank(prev.state));
                    if prev.state.is_terminal() {
                        prop_assert_eq!(record.state, prev.state);
                    }

                    // Order preservation: a started role has only completed predecessors.
                    if record.started_at.is_some() {
                        for lower in manifest.ordered_roles().filter(|r| r.order_index < record.order_index) {
                            prop_assert_eq!(lower.state, RoleState::Completed);
                        }
                    }

                    // Completion contract.
                    if record.state == RoleState::Completed {
                        prop_assert!(record.required_outputs.is_subset(&record.observed_outputs));
                    }
                }

                prop_assert!(
                    manifest.flow_state == before.flow_state
                        || flow::can_transition(before.flow_state, manifest.flow_state)
                );
                if before.flow_state.is_terminal() {
                    prop_assert_eq!(manifest.flow_state, FlowState::Archived);
                }
            }
        }

        #[test]
        fn prop_completion_iff_contract_holds(
            observed in prop::collection::btree_set("[a-c]\\.md", 0..4),
            required in prop::collection::btree_set("[a-c]\\.md", 0..4),
        ) {
            let now = Utc::now();
            let record = RoleRecord::new("qa", 0, "a.md", required.clone());
            let running = role::transition(&record, RoleState::Running, now, None).unwrap();
            let result = role::transition(&running, RoleState::Completed, now, Some(&observed));
            prop_assert_eq!(result.is_ok(), required.is_subset(&observed));
        }
    }
}
