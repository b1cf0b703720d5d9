//! Configuration view and validation commands: `baton config`.

use anyhow::{Context, Result};
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    use baton::baton_config::{CONFIG_FILE, DEFAULT_CONFIG};
    use baton::config::Config;
    use baton::init::BATON_DIR;

    let baton_dir = project_dir.join(BATON_DIR);
    let config_path = baton_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = Config::new(project_dir.to_path_buf(), false)?;
            println!();
            println!("Baton Configuration");
            println!("===================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No baton.toml found at {}", config_path.display());
                println!("Run 'baton config init' to create one.");
            }
            println!();

            println!("[roles]");
            match config.roster() {
                Ok(roster) => {
                    for (index, role) in roster.iter().enumerate() {
                        let required: Vec<String> = role.required_outputs().into_iter().collect();
                        println!("  {}. {} → {}", index + 1, role.id, required.join(", "));
                    }
                }
                Err(e) => println!("  (invalid: {:#})", e),
            }
            println!();

            println!("[gates]");
            match &config.toml.gates {
                None => println!("  (not configured)"),
                Some(gates) if gates.is_empty() => println!("  (none)"),
                Some(gates) => {
                    for gate in gates {
                        println!(
                            "  {} = \"{}\" (timeout {}s)",
                            gate.name, gate.command, gate.timeout_secs
                        );
                    }
                }
            }
            println!();

            println!("Effective values (with env overrides):");
            match config.threshold_minutes(None) {
                Ok(minutes) => println!("  watchdog.threshold_minutes = {}", minutes),
                Err(_) => println!("  watchdog.threshold_minutes = (not set)"),
            }
            println!(
                "  orchestrator.poll_interval_secs = {}",
                config.poll_interval().as_secs()
            );
            println!(
                "  orchestrator.role_timeout_secs = {}",
                config.role_timeout().as_secs()
            );
            match config.worker_command() {
                Some(command) => println!("  worker.command = \"{}\"", command),
                None => println!("  worker.command = (none: spawn requests are handed off)"),
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = Config::new(project_dir.to_path_buf(), false)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("baton.toml already exists at {}", config_path.display());
                println!("Edit it directly or delete it first.");
                return Ok(());
            }
            std::fs::create_dir_all(&baton_dir)
                .with_context(|| format!("Failed to create directory: {}", baton_dir.display()))?;
            std::fs::write(&config_path, DEFAULT_CONFIG)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
