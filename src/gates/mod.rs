//! Verification gates.
//!
//! Gates are opaque shell commands run in configured order once every role has completed.
//! Exit status 0 passes. The first failing gate stops the sequence; later gates are not
//! attempted.

use crate::manifest::GateResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

/// Captured output kept per gate; longer output keeps its tail.
const MAX_CAPTURED_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSpec {
    pub name: String,
    pub command: String,
    /// Relative paths resolve against the project directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_gate_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_gate_timeout_secs() -> u64 {
    600
}

impl GateSpec {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            working_dir: None,
            timeout_secs: default_gate_timeout_secs(),
        }
    }
}

pub struct GateRunner {
    project_dir: PathBuf,
}

impl GateRunner {
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
        }
    }

    /// Run `specs` in order, stopping after the first failure.
    ///
    /// The returned list holds one result per attempted gate, so its last element is the
    /// failing gate when the run did not pass.
    pub async fn run_gates(&self, run_id: &str, specs: &[GateSpec]) -> Vec<GateResult> {
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let result = self.run_gate(run_id, spec).await;
            let passed = result.passed;
            results.push(result);
            if !passed {
                let skipped = specs.len() - results.len();
                if skipped > 0 {
                    tracing::info!(run_id = %run_id, gate = %spec.name, skipped, "gate failed, skipping remaining gates");
                }
                break;
            }
        }
        results
    }

    async fn run_gate(&self, run_id: &str, spec: &GateSpec) -> GateResult {
        let working_dir = spec
            .working_dir
            .as_ref()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    self.project_dir.join(p)
                }
            })
            .unwrap_or_else(|| self.project_dir.clone());

        tracing::info!(run_id = %run_id, gate = %spec.name, command = %spec.command, "running gate");
        let ran_at = Utc::now();
        let started = Instant::now();

        let spawned = Command::new("sh")
            .arg("-c")
            .arg(&spec.command)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("BATON_RUN_ID", run_id)
            .env("BATON_GATE", &spec.name)
            .kill_on_drop(true)
            .spawn();

        let (passed, exit_code, captured_output) = match spawned {
            Err(e) => (
                false,
                None,
                format!("failed to spawn gate command `{}`: {}", spec.command, e),
            ),
            Ok(child) => {
                let limit = Duration::from_secs(spec.timeout_secs);
                match timeout(limit, child.wait_with_output()).await {
                    Err(_) => (
                        false,
                        None,
                        format!("gate timed out after {} seconds", spec.timeout_secs),
                    ),
                    Ok(Err(e)) => (false, None, format!("failed to wait for gate command: {}", e)),
                    Ok(Ok(output)) => {
                        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                        let stderr = String::from_utf8_lossy(&output.stderr);
                        if !stderr.is_empty() {
                            if !text.is_empty() && !text.ends_with('\n') {
                                text.push('\n');
                            }
                            text.push_str(&stderr);
                        }
                        (output.status.success(), output.status.code(), tail(&text))
                    }
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        if passed {
            tracing::info!(run_id = %run_id, gate = %spec.name, duration_ms, "gate passed");
        } else {
            tracing::warn!(run_id = %run_id, gate = %spec.name, ?exit_code, duration_ms, "gate failed");
        }

        GateResult {
            name: spec.name.clone(),
            passed,
            captured_output,
            exit_code,
            duration_ms,
            ran_at,
        }
    }
}

fn tail(text: &str) -> String {
    if text.len() <= MAX_CAPTURED_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - MAX_CAPTURED_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[... output truncated ...]\n{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_passing_gates_all_run() {
        let dir = tempdir().unwrap();
        let runner = GateRunner::new(dir.path());
        let specs = vec![
            GateSpec::new("build", "echo building"),
            GateSpec::new("test", "echo testing"),
        ];
        let results = runner.run_gates("run-1", &specs).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.passed));
        assert_eq!(results[0].captured_output.trim(), "building");
        assert_eq!(results[1].exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_first_failure_stops_the_sequence() {
        let dir = tempdir().unwrap();
        let runner = GateRunner::new(dir.path());
        let specs = vec![
            GateSpec::new("build", "echo 'error[E0308]: mismatched types' >&2; exit 101"),
            GateSpec::new("test", "touch test-ran"),
            GateSpec::new("lint", "touch lint-ran"),
        ];
        let results = runner.run_gates("run-1", &specs).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
        assert_eq!(results[0].exit_code, Some(101));
        assert!(results[0].captured_output.contains("mismatched types"));
        assert!(!dir.path().join("test-ran").exists());
        assert!(!dir.path().join("lint-ran").exists());
    }

    #[tokio::test]
    async fn test_gate_sees_run_environment_and_working_dir() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        let runner = GateRunner::new(dir.path());
        let mut spec = GateSpec::new("env", "echo \"$BATON_RUN_ID/$BATON_GATE\"; pwd");
        spec.working_dir = Some(PathBuf::from("sub"));
        let results = runner.run_gates("run-9", &[spec]).await;
        assert!(results[0].passed);
        assert!(results[0].captured_output.contains("run-9/env"));
        assert!(results[0].captured_output.trim_end().ends_with("sub"));
    }

    #[tokio::test]
    async fn test_gate_timeout_fails() {
        let dir = tempdir().unwrap();
        let runner = GateRunner::new(dir.path());
        let mut spec = GateSpec::new("slow", "sleep 5");
        spec.timeout_secs = 1;
        let results = runner.run_gates("run-1", &[spec]).await;
        assert!(!results[0].passed);
        assert!(results[0].exit_code.is_none());
        assert!(results[0].captured_output.contains("timed out"));
    }

    #[tokio::test]
    async fn test_empty_gate_list_yields_no_results() {
        let dir = tempdir().unwrap();
        let runner = GateRunner::new(dir.path());
        assert!(runner.run_gates("run-1", &[]).await.is_empty());
    }

    #[test]
    fn test_tail_keeps_end_of_long_output() {
        let long = "x".repeat(MAX_CAPTURED_BYTES + 10) + "END";
        let kept = tail(&long);
        assert!(kept.starts_with("[... output truncated ...]"));
        assert!(kept.ends_with("END"));
        assert_eq!(tail("short"), "short");
    }
}
