//! Append-only per-run log.
//!
//! One JSON line per accepted manifest write. Each entry carries the structured changes the
//! write applied, so folding the log from the `created` entry reproduces the manifest.

use super::RunManifest;
use crate::errors::StoreError;
use crate::machine::{self, Change};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Who performed a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Actor {
    Orchestrator,
    Watchdog,
    GateRunner,
    /// Direct operator commands: create and archive.
    Operator,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Watchdog => "watchdog",
            Self::GateRunner => "gate-runner",
            Self::Operator => "operator",
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    /// Manifest version produced by this write.
    pub version: u64,
    pub actor: Actor,
    pub event: String,
    pub detail: String,
    pub changes: Vec<Change>,
}

/// The edit a writer wants to commit: an event name, human detail, and the changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub event: String,
    pub detail: String,
    pub changes: Vec<Change>,
}

impl Mutation {
    pub fn new(event: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            detail: detail.into(),
            changes: Vec::new(),
        }
    }

    pub fn with(mut self, change: Change) -> Self {
        self.changes.push(change);
        self
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }
}

pub struct RunLog {
    run_id: String,
    path: PathBuf,
}

impl RunLog {
    pub fn new(run_id: &str, path: &Path) -> Self {
        Self {
            run_id: run_id.to_string(),
            path: path.to_path_buf(),
        }
    }

    /// Append one entry and flush it to disk.
    pub fn append(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(entry).map_err(|source| StoreError::Serialize {
            run_id: self.run_id.clone(),
            source,
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io("open log", &self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| StoreError::io("append to log", &self.path, e))?;
        file.sync_data()
            .map_err(|e| StoreError::io("sync log", &self.path, e))?;
        Ok(())
    }

    /// All complete entries in write order.
    ///
    /// A final line without a trailing newline is an interrupted append and is skipped;
    /// any other unparsable line is corruption.
    pub fn entries(&self) -> Result<Vec<LogEntry>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io("read log", &self.path, e)),
        };

        let complete = match content.rfind('\n') {
            Some(end) => &content[..=end],
            None => "",
        };
        if complete.len() < content.len() {
            tracing::warn!(run_id = %self.run_id, "ignoring interrupted log append");
        }

        complete
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|e| StoreError::CorruptLog {
                    run_id: self.run_id.clone(),
                    detail: format!("line {}: {}", index + 1, e),
                })
            })
            .collect()
    }

    /// Drop an interrupted trailing append so the next entry starts on a fresh line.
    pub fn repair_tail(&self) -> Result<bool, StoreError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StoreError::io("read log", &self.path, e)),
        };
        if content.is_empty() || content.ends_with(b"\n") {
            return Ok(false);
        }
        let keep = content
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| StoreError::io("open log", &self.path, e))?;
        file.set_len(keep as u64)
            .map_err(|e| StoreError::io("truncate log", &self.path, e))?;
        file.sync_data()
            .map_err(|e| StoreError::io("sync log", &self.path, e))?;
        tracing::warn!(run_id = %self.run_id, bytes = content.len() - keep, "truncated interrupted log append");
        Ok(true)
    }
}

/// Rebuild a manifest by folding log entries in order.
pub fn replay(run_id: &str, entries: &[LogEntry]) -> Result<RunManifest, StoreError> {
    let corrupt = |detail: String| StoreError::CorruptLog {
        run_id: run_id.to_string(),
        detail,
    };

    let (first, rest) = entries
        .split_first()
        .ok_or_else(|| corrupt("log is empty".to_string()))?;
    let mut manifest = match first.changes.as_slice() {
        [Change::Created { manifest }] => (**manifest).clone(),
        _ => return Err(corrupt("first entry is not a creation".to_string())),
    };
    manifest.version = first.version;
    manifest.updated_at = first.timestamp;

    for entry in rest {
        if entry.version != manifest.version + 1 {
            return Err(corrupt(format!(
                "version {} follows version {}",
                entry.version, manifest.version
            )));
        }
        machine::apply_all(&mut manifest, &entry.changes)
            .map_err(|e| corrupt(format!("version {}: {}", entry.version, e)))?;
        manifest.version = entry.version;
        manifest.updated_at = entry.timestamp;
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{FlowState, RoleSeed};
    use tempfile::tempdir;

    fn entry(run_id: &str, version: u64, changes: Vec<Change>) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            version,
            actor: Actor::Orchestrator,
            event: "test".to_string(),
            detail: String::new(),
            changes,
        }
    }

    fn created(run_id: &str) -> LogEntry {
        let manifest = RunManifest::new(
            run_id,
            "objective",
            vec![RoleSeed {
                role_id: "architect".to_string(),
                deliverable: "01.md".to_string(),
                required_outputs: Default::default(),
            }],
        );
        entry(
            run_id,
            1,
            vec![Change::Created {
                manifest: Box::new(manifest),
            }],
        )
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let log = RunLog::new("run-1", &dir.path().join("log.jsonl"));
        assert!(log.entries().unwrap().is_empty());

        log.append(&created("run-1")).unwrap();
        log.append(&entry("run-1", 2, vec![Change::flow(FlowState::Created, FlowState::Pending)]))
            .unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].version, 2);
        assert_eq!(entries[1].actor, Actor::Orchestrator);
    }

    #[test]
    fn test_interrupted_append_is_skipped_and_repaired() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let log = RunLog::new("run-1", &path);
        log.append(&created("run-1")).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"timestamp\":\"2026-").unwrap();
        drop(file);

        assert_eq!(log.entries().unwrap().len(), 1);
        assert!(log.repair_tail().unwrap());
        assert!(!log.repair_tail().unwrap());
        assert!(fs::read_to_string(&path).unwrap().ends_with('\n'));
    }

    #[test]
    fn test_corrupt_middle_line_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        fs::write(&path, "not json\n").unwrap();
        let log = RunLog::new("run-1", &path);
        assert!(matches!(log.entries(), Err(StoreError::CorruptLog { .. })));
    }

    #[test]
    fn test_replay_applies_changes_in_order() {
        let entries = vec![
            created("run-1"),
            entry("run-1", 2, vec![Change::flow(FlowState::Created, FlowState::Pending)]),
            entry("run-1", 3, vec![Change::flow(FlowState::Pending, FlowState::Running)]),
        ];
        let manifest = replay("run-1", &entries).unwrap();
        assert_eq!(manifest.flow_state, FlowState::Running);
        assert_eq!(manifest.version, 3);
        assert_eq!(manifest.updated_at, entries[2].timestamp);
    }

    #[test]
    fn test_replay_rejects_version_gaps() {
        let entries = vec![
            created("run-1"),
            entry("run-1", 3, vec![Change::flow(FlowState::Created, FlowState::Pending)]),
        ];
        assert!(matches!(
            replay("run-1", &entries),
            Err(StoreError::CorruptLog { .. })
        ));
    }

    #[test]
    fn test_replay_requires_creation_first() {
        let entries = vec![entry(
            "run-1",
            1,
            vec![Change::flow(FlowState::Created, FlowState::Pending)],
        )];
        assert!(replay("run-1", &entries).is_err());
        assert!(replay("run-1", &[]).is_err());
    }
}
