//! Role state machine.
//!
//! Valid transitions: `pending -> running`, `running -> completed`, `running -> failed`.
//! `completed` and `failed` are terminal. The `running -> completed` edge additionally
//! requires the completion contract: every required output must be in the observed set.

use crate::errors::TransitionError;
use crate::manifest::{RoleRecord, RoleState};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

pub fn allowed_targets(current: RoleState) -> &'static [RoleState] {
    match current {
        RoleState::Pending => &[RoleState::Running],
        RoleState::Running => &[RoleState::Completed, RoleState::Failed],
        RoleState::Completed | RoleState::Failed => &[],
    }
}

pub fn can_transition(current: RoleState, target: RoleState) -> bool {
    allowed_targets(current).contains(&target)
}

/// Return a copy of `record` moved to `target` at time `at`.
///
/// `observed` is the artifact snapshot taken by the caller; it is required for the
/// `completed` edge and recorded on both terminal edges. A missing snapshot counts as empty.
pub fn transition(
    record: &RoleRecord,
    target: RoleState,
    at: DateTime<Utc>,
    observed: Option<&BTreeSet<String>>,
) -> Result<RoleRecord, TransitionError> {
    if !can_transition(record.state, target) {
        return Err(TransitionError::InvalidRoleTransition {
            role: record.role_id.clone(),
            from: record.state,
            to: target,
        });
    }

    let mut next = record.clone();
    match target {
        RoleState::Running => {
            next.started_at = Some(at);
            next.attempts += 1;
        }
        RoleState::Completed => {
            let empty = BTreeSet::new();
            let observed = observed.unwrap_or(&empty);
            let missing = record.missing_outputs(observed);
            if !missing.is_empty() {
                return Err(TransitionError::CompletionContractUnmet {
                    role: record.role_id.clone(),
                    missing,
                });
            }
            next.ended_at = Some(at);
            next.observed_outputs = observed.clone();
        }
        RoleState::Failed => {
            next.ended_at = Some(at);
            if let Some(observed) = observed {
                next.observed_outputs = observed.clone();
            }
        }
        RoleState::Pending => unreachable!("no edge leads back to pending"),
    }
    next.state = target;
    Ok(next)
}
