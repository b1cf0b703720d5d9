//! Read-only commands: `status`, `log`, `list`.

use anyhow::{Context, Result};
use baton::config::Config;
use baton::ui::{render_list, render_log, render_status};

pub fn cmd_status(config: &Config, run_id: &str, json: bool) -> Result<()> {
    let manifest = config.store().peek(run_id)?;
    if json {
        let out = serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?;
        println!("{}", out);
    } else {
        print!("{}", render_status(&manifest));
    }
    Ok(())
}

pub fn cmd_log(config: &Config, run_id: &str, json: bool) -> Result<()> {
    let entries = config.store().read_log(run_id)?;
    if json {
        for entry in &entries {
            println!(
                "{}",
                serde_json::to_string(entry).context("Failed to serialize log entry")?
            );
        }
    } else {
        print!("{}", render_log(&entries));
    }
    Ok(())
}

pub fn cmd_list(config: &Config) -> Result<()> {
    let runs = config.store().list()?;
    print!("{}", render_list(&runs));
    Ok(())
}
