//! Creating and archiving runs.

use crate::baton_config::{RoleDefinition, validate_roster};
use crate::errors::OrchestratorError;
use crate::machine::Change;
use crate::manifest::{Actor, FlowState, ManifestStore, Mutation, RoleSeed, RunManifest};
use crate::packet::{self, PacketInput};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    /// Defaults to `run-%Y%m%d-%H%M%S` (UTC).
    pub run_id: Option<String>,
    pub objective: String,
    pub criteria: Vec<String>,
    pub scope: String,
}

pub fn default_run_id(now: DateTime<Utc>) -> String {
    now.format("run-%Y%m%d-%H%M%S").to_string()
}

/// Persist a new run at version 1 and write its packet.
pub fn create_run(
    store: &ManifestStore,
    roster: &[RoleDefinition],
    request: CreateRequest,
) -> Result<RunManifest, OrchestratorError> {
    let now = Utc::now();
    let run_id = request.run_id.unwrap_or_else(|| default_run_id(now));
    ManifestStore::validate_run_id(&run_id)?;
    validate_roster(roster)?;

    let seeds = roster
        .iter()
        .map(|role| RoleSeed {
            role_id: role.id.clone(),
            deliverable: role.output.clone(),
            required_outputs: role.required_outputs(),
        })
        .collect();
    let manifest = store.create(
        RunManifest::new(&run_id, &request.objective, seeds),
        Actor::Operator,
    )?;

    let input = PacketInput {
        run_id: run_id.clone(),
        created_at: manifest.created_at,
        objective: request.objective,
        criteria: request.criteria,
        scope: request.scope,
    };
    packet::write_packet(&store.run_dir(&run_id), &input, roster)?;
    Ok(manifest)
}

/// Move a finished run to `archived` and tick its checklist.
pub fn archive_run(store: &ManifestStore, run_id: &str) -> Result<RunManifest, OrchestratorError> {
    let update = store.update::<_, OrchestratorError>(run_id, Actor::Operator, |m| {
        if m.flow_state == FlowState::Archived {
            return Err(OrchestratorError::TerminalRun {
                run_id: run_id.to_string(),
                state: m.flow_state,
            });
        }
        Ok(Some(
            Mutation::new("archived", format!("{} -> archived", m.flow_state))
                .with(Change::flow(m.flow_state, FlowState::Archived)),
        ))
    })?;

    let manifest = update.into_manifest();
    packet::write_checklist(&store.run_dir(run_id), &manifest)?;
    tracing::info!(run_id = %run_id, "run archived");
    Ok(manifest)
}
