//! Run lifecycle commands: `create`, `orchestrate`, `archive`.

use anyhow::{Context, Result};
use baton::config::Config;
use baton::manifest::RoleState;
use baton::orchestrator::{
    CreateRequest, Orchestrator, RunOutcome, archive_run, create_run, spawner_from_config,
};
use baton::ui::{ConsoleObserver, print_outcome_banner};
use console::style;
use std::process::ExitCode;
use std::sync::Arc;

/// Exit status when a role is still running after the role timeout.
const EXIT_SUSPENDED: u8 = 2;

pub fn cmd_create(config: &Config, request: CreateRequest) -> Result<()> {
    config.ensure_directories()?;
    let roster = config.roster()?;
    let store = config.store();
    let manifest = create_run(&store, &roster, request).context("Failed to create run")?;

    println!("Created run {}", style(&manifest.run_id).bold());
    println!("  Packet: {}", store.run_dir(&manifest.run_id).display());
    println!("  Roster: {}", manifest.roster.join(" → "));
    println!();
    println!("Next: baton orchestrate {}", manifest.run_id);
    Ok(())
}

pub async fn cmd_orchestrate(config: &Config, run_id: &str) -> Result<ExitCode> {
    let store = config.store();
    let manifest = store.load(run_id)?;

    let ui = Arc::new(ConsoleObserver::new(
        manifest.roster.len() as u64,
        manifest.count_in(RoleState::Completed) as u64,
        config.verbose,
    ));
    let orchestrator =
        Orchestrator::from_config(config, spawner_from_config(config))?.with_observer(ui.clone());

    println!(
        "Orchestrating {} ({} roles)",
        style(run_id).bold(),
        manifest.roster.len()
    );
    let outcome = orchestrator.orchestrate(run_id).await;
    ui.finish();

    match outcome? {
        RunOutcome::Completed { manifest } => {
            print_outcome_banner(run_id, manifest.flow_state);
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Failed { manifest } => {
            print_outcome_banner(run_id, manifest.flow_state);
            if let Some(failure) = &manifest.failure {
                eprintln!(
                    "{} {}: {}",
                    style(failure.kind).red().bold(),
                    style(&failure.subject).bold(),
                    failure.detail
                );
            }
            Ok(ExitCode::FAILURE)
        }
        RunOutcome::Suspended { role, .. } => {
            println!(
                "Role {} is still running. Run `baton orchestrate {}` again to keep waiting; \
                 `baton watchdog {}` fails it once stale.",
                style(&role).yellow(),
                run_id,
                run_id
            );
            Ok(ExitCode::from(EXIT_SUSPENDED))
        }
    }
}

pub fn cmd_archive(config: &Config, run_id: &str) -> Result<()> {
    let manifest = archive_run(&config.store(), run_id)?;
    println!(
        "Archived run {} ({})",
        style(&manifest.run_id).bold(),
        if manifest.failure.is_some() {
            "failed"
        } else {
            "completed"
        }
    );
    Ok(())
}
