//! Flow state machine.
//!
//! Valid transitions:
//! - `created -> pending` (orchestration starts)
//! - `pending -> running` (first role is about to spawn)
//! - `running -> completed` (all roles completed and all gates passed)
//! - `running -> failed` (a role or gate failed)
//! - `completed -> archived`, `failed -> archived` (run finalized)
//!
//! `archived` has no outgoing edges.

use crate::errors::TransitionError;
use crate::manifest::{FlowState, RoleState, RunFailure, RunManifest};

pub fn allowed_targets(current: FlowState) -> &'static [FlowState] {
    match current {
        FlowState::Created => &[FlowState::Pending],
        FlowState::Pending => &[FlowState::Running],
        FlowState::Running => &[FlowState::Completed, FlowState::Failed],
        FlowState::Completed => &[FlowState::Archived],
        FlowState::Failed => &[FlowState::Archived],
        FlowState::Archived => &[],
    }
}

pub fn can_transition(current: FlowState, target: FlowState) -> bool {
    allowed_targets(current).contains(&target)
}

/// Return a copy of `manifest` moved to `target`. Pure: persistence is the caller's job.
pub fn transition(manifest: &RunManifest, target: FlowState) -> Result<RunManifest, TransitionError> {
    let mut next = manifest.clone();
    apply(&mut next, target, None)?;
    Ok(next)
}

pub(crate) fn apply(
    manifest: &mut RunManifest,
    target: FlowState,
    failure: Option<&RunFailure>,
) -> Result<(), TransitionError> {
    let current = manifest.flow_state;
    if !can_transition(current, target) {
        return Err(TransitionError::InvalidFlowTransition {
            from: current,
            to: target,
        });
    }

    if current == FlowState::Running {
        if let Some(running) = manifest.running_role() {
            return Err(TransitionError::RoleStillRunning {
                role: running.role_id.clone(),
            });
        }
    }

    if target == FlowState::Completed {
        let unfinished: Vec<String> = manifest
            .ordered_roles()
            .filter(|r| r.state != RoleState::Completed)
            .map(|r| r.role_id.clone())
            .collect();
        if !unfinished.is_empty() {
            return Err(TransitionError::RolesIncomplete { unfinished });
        }
        if let Some(gate) = manifest.gates.iter().find(|g| !g.passed) {
            return Err(TransitionError::GateNotPassed {
                gate: gate.name.clone(),
            });
        }
    }

    manifest.flow_state = target;
    if let Some(failure) = failure {
        manifest.failure = Some(failure.clone());
    }
    Ok(())
}
