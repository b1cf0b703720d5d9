use anyhow::{Context, Result};
use baton::config::Config;
use baton::logging::{self, LogFormat};
use baton::orchestrator::CreateRequest;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "baton")]
#[command(version, about = "Runs a fixed roster of worker roles, one at a time, with verified handoffs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Diagnostic log format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Plain, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .baton/ directory and a default baton.toml
    Init,
    /// Create a run: manifest, audit log and run packet
    Create {
        #[arg(long)]
        objective: String,
        /// Acceptance criterion (repeatable)
        #[arg(long = "criterion")]
        criteria: Vec<String>,
        #[arg(long, default_value = "Project scope")]
        scope: String,
        /// Defaults to run-<UTC timestamp>
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Drive a run: start each role in order, verify its outputs, then run the gates
    Orchestrate { run_id: String },
    /// Show flow and role states
    Status {
        run_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Fail a role that has been running longer than the threshold
    Watchdog {
        #[arg(conflicts_with = "all", required_unless_present = "all")]
        run_id: Option<String>,
        /// Sweep every running run
        #[arg(long)]
        all: bool,
        #[arg(long, env = "BATON_STALE_MINUTES")]
        threshold_minutes: Option<u64>,
    },
    /// Archive a completed or failed run
    Archive { run_id: String },
    /// Print a run's audit log
    Log {
        run_id: String,
        #[arg(long)]
        json: bool,
    },
    /// List runs
    List,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Check baton.toml for problems
    Validate,
    /// Write a default baton.toml
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => {
            cmd::cmd_init(&project_dir)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, command.clone())?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let config = Config::new(project_dir, cli.verbose)?;
    let _log_guard = logging::init(cli.verbose, cli.log_format, Some(config.log_dir.as_path()))?;

    match cli.command {
        Commands::Create {
            objective,
            criteria,
            scope,
            run_id,
        } => cmd::cmd_create(
            &config,
            CreateRequest {
                run_id,
                objective,
                criteria,
                scope,
            },
        )?,
        Commands::Orchestrate { run_id } => return cmd::cmd_orchestrate(&config, &run_id).await,
        Commands::Status { run_id, json } => cmd::cmd_status(&config, &run_id, json)?,
        Commands::Watchdog {
            run_id,
            all,
            threshold_minutes,
        } => cmd::cmd_watchdog(&config, run_id.as_deref(), all, threshold_minutes)?,
        Commands::Archive { run_id } => cmd::cmd_archive(&config, &run_id)?,
        Commands::Log { run_id, json } => cmd::cmd_log(&config, &run_id, json)?,
        Commands::List => cmd::cmd_list(&config)?,
        Commands::Init | Commands::Config { .. } => {}
    }
    Ok(ExitCode::SUCCESS)
}
