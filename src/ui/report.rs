//! Plain-text renderings of manifests and logs for `status`, `log` and `list`.

use crate::manifest::{FlowState, LogEntry, RoleState, RunManifest};
use crate::ui::icons::{ARCHIVE, CHECK, CROSS, GATE, PENDING, RUNNING};
use console::{Emoji, style};

fn role_icon(state: RoleState) -> Emoji<'static, 'static> {
    match state {
        RoleState::Pending => PENDING,
        RoleState::Running => RUNNING,
        RoleState::Completed => CHECK,
        RoleState::Failed => CROSS,
    }
}

fn flow_label(state: FlowState) -> String {
    let label = style(state.as_str()).bold();
    match state {
        FlowState::Completed => label.green().to_string(),
        FlowState::Failed => label.red().to_string(),
        FlowState::Running => label.yellow().to_string(),
        FlowState::Archived => format!("{}{}", ARCHIVE, label),
        FlowState::Created | FlowState::Pending => label.to_string(),
    }
}

pub fn render_status(manifest: &RunManifest) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Run {} [{}] v{}\n",
        style(&manifest.run_id).bold(),
        flow_label(manifest.flow_state),
        manifest.version
    ));
    if !manifest.objective.is_empty() {
        out.push_str(&format!("  Objective: {}\n", manifest.objective));
    }
    out.push_str(&format!(
        "  Created: {}  Updated: {}\n\n",
        manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        manifest.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    out.push_str("Roles:\n");
    for role in manifest.ordered_roles() {
        out.push_str(&format!(
            "  {}{:<12} {:<10} {}\n",
            role_icon(role.state),
            role.role_id,
            role.state.as_str(),
            style(&role.deliverable).dim()
        ));
        if let Some(started) = role.started_at {
            let ended = role
                .ended_at
                .map(|e| e.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "…".to_string());
            out.push_str(&format!(
                "      {} {} → {}\n",
                style("time").dim(),
                started.format("%H:%M:%S"),
                ended
            ));
        }
        if let Some(reason) = &role.failure_reason {
            out.push_str(&format!("      {}\n", style(reason.describe()).red()));
        }
    }

    if !manifest.gates.is_empty() {
        out.push_str("\nGates:\n");
        for gate in &manifest.gates {
            let mark = if gate.passed { CHECK } else { CROSS };
            out.push_str(&format!("  {}{}{}\n", GATE, mark, gate.name));
            if !gate.passed && !gate.captured_output.is_empty() {
                for line in gate.captured_output.lines() {
                    out.push_str(&format!("      {}\n", style(line).dim()));
                }
            }
        }
    }

    if let Some(failure) = &manifest.failure {
        out.push_str(&format!(
            "\n{}{} {}: {}\n",
            CROSS,
            style(failure.kind).red().bold(),
            failure.subject,
            failure.detail
        ));
    }
    out
}

pub fn render_log(entries: &[LogEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            format!(
                "v{:<3} {} {:<12} {:<16} {}\n",
                e.version,
                e.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
                e.actor,
                e.event,
                e.detail
            )
        })
        .collect()
}

pub fn render_list(manifests: &[RunManifest]) -> String {
    if manifests.is_empty() {
        return "No runs.\n".to_string();
    }
    manifests
        .iter()
        .map(|m| {
            format!(
                "{:<24} {:<10} {}/{} roles  {}\n",
                m.run_id,
                m.flow_state.as_str(),
                m.count_in(RoleState::Completed),
                m.roster.len(),
                m.created_at.format("%Y-%m-%d %H:%M")
            )
        })
        .collect()
}
