//! Run packet: the human-readable files created alongside a run.
//!
//! ```text
//! .baton/runs/<run_id>/
//! ├── RUN.md              # id, creation time, objective, acceptance criteria, scope
//! ├── brief-<role>.md     # one per role
//! ├── CHECKLIST.md        # rewritten on archive
//! └── FINAL.md
//! ```
//!
//! Role deliverables are deliberately not created here; their presence is what the
//! completion contract checks.

use crate::baton_config::RoleDefinition;
use crate::manifest::{FlowState, RoleState, RunManifest};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;

pub const RUN_FILE: &str = "RUN.md";
pub const CHECKLIST_FILE: &str = "CHECKLIST.md";
pub const FINAL_FILE: &str = "FINAL.md";

pub const BRIEF_TEMPLATE: &str = "# Brief: {{role}}

- Run: {{run_id}}
- Output file: {{output_file}}

## Objective
{{objective}}

## Responsibilities
{{responsibilities}}

## Acceptance criteria
{{acceptance_criteria}}

## Scope
{{scope}}
";

const FINAL_TEMPLATE: &str = "# Final Summary

## Changes
- TBD

## Deferred
- TBD

## Blockers
- None
";

/// What `baton create` was asked to do.
#[derive(Debug, Clone)]
pub struct PacketInput {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub objective: String,
    pub criteria: Vec<String>,
    pub scope: String,
}

/// Replace every `{{key}}` in `template` with its value. Unknown placeholders are left alone.
pub fn render(template: &str, values: &HashMap<&str, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}

pub fn brief_file(role_id: &str) -> String {
    format!("brief-{}.md", role_id)
}

/// Whether a top-level run directory entry is written by [`write_packet`] or
/// [`write_checklist`].
pub fn is_packet_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    [RUN_FILE, CHECKLIST_FILE, FINAL_FILE]
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
        || (lower.starts_with("brief-") && lower.ends_with(".md"))
}

fn criteria_text(criteria: &[String]) -> String {
    if criteria.is_empty() {
        "- (none provided)".to_string()
    } else {
        criteria
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn write_packet(run_dir: &Path, input: &PacketInput, roster: &[RoleDefinition]) -> Result<()> {
    std::fs::create_dir_all(run_dir)
        .with_context(|| format!("Failed to create directory: {}", run_dir.display()))?;
    let criteria = criteria_text(&input.criteria);

    let run_md = format!(
        "# Run\n\n- ID: {}\n- Created (UTC): {}\n- Objective: {}\n\n## Acceptance criteria\n{}\n\n## Scope\n{}\n",
        input.run_id,
        input.created_at.to_rfc3339(),
        input.objective,
        criteria,
        input.scope
    );
    write(run_dir, RUN_FILE, &run_md)?;

    for role in roster {
        let values = HashMap::from([
            ("role", role.id.clone()),
            ("run_id", input.run_id.clone()),
            ("objective", input.objective.clone()),
            ("acceptance_criteria", criteria.clone()),
            ("scope", input.scope.clone()),
            ("responsibilities", role.responsibilities.clone()),
            ("output_file", role.output.clone()),
        ]);
        write(
            run_dir,
            &brief_file(&role.id),
            &render(BRIEF_TEMPLATE, &values),
        )?;
    }

    let items: Vec<(String, bool)> = roster
        .iter()
        .map(|r| (format!("{} complete ({})", r.id, r.output), false))
        .collect();
    write(run_dir, CHECKLIST_FILE, &render_checklist(&items, false, false))?;
    write(run_dir, FINAL_FILE, FINAL_TEMPLATE)?;
    Ok(())
}

/// Rewrite CHECKLIST.md from the manifest's recorded outcome.
pub fn write_checklist(run_dir: &Path, manifest: &RunManifest) -> Result<()> {
    let items: Vec<(String, bool)> = manifest
        .ordered_roles()
        .map(|r| {
            (
                format!("{} complete ({})", r.role_id, r.deliverable),
                r.state == RoleState::Completed,
            )
        })
        .collect();
    let gates_passed = manifest.all_roles_completed()
        && manifest.gates.iter().all(|g| g.passed)
        && manifest.failure.is_none();
    let finished = matches!(manifest.flow_state, FlowState::Completed)
        || (manifest.flow_state == FlowState::Archived && manifest.failure.is_none());
    write(
        run_dir,
        CHECKLIST_FILE,
        &render_checklist(&items, gates_passed, finished),
    )
}

fn render_checklist(roles: &[(String, bool)], gates_passed: bool, finished: bool) -> String {
    let mark = |done: bool| if done { "x" } else { " " };
    let mut out = String::from("# Integration Checklist\n\n");
    for (label, done) in roles {
        out.push_str(&format!("- [{}] {}\n", mark(*done), label));
    }
    out.push_str(&format!("- [{}] Gates passed\n", mark(gates_passed)));
    out.push_str(&format!("- [{}] FINAL.md written\n", mark(finished)));
    out
}

fn write(run_dir: &Path, name: &str, content: &str) -> Result<()> {
    let path = run_dir.join(name);
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
}
