//! Stale-role sweeps: `baton watchdog`.

use anyhow::{Result, bail};
use baton::config::Config;
use baton::watchdog::{SweepOutcome, sweep, sweep_all};
use chrono::Utc;
use console::style;

pub fn cmd_watchdog(
    config: &Config,
    run_id: Option<&str>,
    all: bool,
    threshold: Option<u64>,
) -> Result<()> {
    let threshold = config.threshold_minutes(threshold)?;
    let store = config.store();

    match (run_id, all) {
        (Some(run_id), false) => {
            let outcome = sweep(&store, run_id, threshold)?;
            report(run_id, &outcome, threshold);
        }
        (None, true) => {
            let results = sweep_all(&store, threshold, Utc::now())?;
            if results.is_empty() {
                println!("No running runs.");
            }
            for (run_id, result) in results {
                match result {
                    Ok(outcome) => report(&run_id, &outcome, threshold),
                    Err(e) => {
                        tracing::warn!(run_id = %run_id, error = %e, "sweep failed");
                        eprintln!("{} {}", style(&run_id).bold(), style(e).red());
                    }
                }
            }
        }
        _ => bail!("Pass a run id or --all"),
    }
    Ok(())
}

fn report(run_id: &str, outcome: &SweepOutcome, threshold: u64) {
    let run = style(run_id).bold();
    match outcome {
        SweepOutcome::Inactive { flow_state } => {
            println!("{}: {}, nothing to check", run, flow_state)
        }
        SweepOutcome::Idle => println!("{}: no role running", run),
        SweepOutcome::Healthy {
            role,
            elapsed_minutes,
        } => println!(
            "{}: {} running for {}m (threshold {}m), not stale",
            run, role, elapsed_minutes, threshold
        ),
        SweepOutcome::Stale {
            role,
            elapsed_minutes,
        } => println!(
            "{}: {} stale after {}m (threshold {}m), marked failed",
            run,
            style(role).red().bold(),
            elapsed_minutes,
            threshold
        ),
        SweepOutcome::Settled { role } => {
            println!("{}: {} finished before it could be failed", run, role)
        }
    }
}
