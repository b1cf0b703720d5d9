//! Durable manifest storage with optimistic concurrency.
//!
//! Layout per run, under `.baton/runs/<run_id>/`:
//! - `manifest.json`: current snapshot
//! - `log.jsonl`: append-only log, one entry per accepted write
//! - `manifest.lock`: advisory lock held for the duration of each write
//!
//! Writes are serialized across processes with an exclusive `fs2` lock. Inside the lock the
//! version is compared, the mutation validated against the state machines, the log entry
//! appended and synced, and only then the snapshot replaced via temp file and rename. If a
//! writer dies between those two steps the log is ahead of the snapshot; the next
//! [`ManifestStore::load`] or write rolls the snapshot forward from the log and drops any
//! interrupted trailing append. [`ManifestStore::peek`] and [`ManifestStore::list`] only take
//! the lock shared and never write: they roll forward in memory.

use super::log::{self, Actor, LogEntry, Mutation, RunLog};
use super::RunManifest;
use crate::errors::StoreError;
use crate::machine::{self, Change};
use chrono::Utc;
use fs2::FileExt;
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tempfile::NamedTempFile;

const MANIFEST_FILE: &str = "manifest.json";
const LOG_FILE: &str = "log.jsonl";
const LOCK_FILE: &str = "manifest.lock";

/// Upper bound on re-read/re-validate cycles in [`ManifestStore::update`].
const MAX_UPDATE_ATTEMPTS: usize = 32;

static RUN_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

/// Result of a write attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// A new version was committed.
    Written(RunManifest),
    /// The mutator declined to write; this is the manifest it inspected.
    Unchanged(RunManifest),
}

impl Update {
    pub fn manifest(&self) -> &RunManifest {
        match self {
            Self::Written(m) | Self::Unchanged(m) => m,
        }
    }

    pub fn into_manifest(self) -> RunManifest {
        match self {
            Self::Written(m) | Self::Unchanged(m) => m,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written(_))
    }
}

enum Swap {
    Done(Update),
    Conflict { actual: u64 },
}

/// Held for the duration of one read-recover or write cycle.
struct RunLock {
    file: File,
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug, Clone)]
pub struct ManifestStore {
    runs_dir: PathBuf,
}

impl ManifestStore {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    pub fn manifest_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(MANIFEST_FILE)
    }

    pub fn log_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(LOG_FILE)
    }

    pub fn validate_run_id(run_id: &str) -> Result<(), StoreError> {
        if run_id == "." || run_id == ".." || !RUN_ID_REGEX.is_match(run_id) {
            return Err(StoreError::InvalidRunId {
                run_id: run_id.to_string(),
            });
        }
        Ok(())
    }

    /// Whether a top-level run directory entry belongs to the store: the snapshot, the log,
    /// the lock file, or a snapshot temp file awaiting rename.
    pub fn is_store_file(name: &str) -> bool {
        [MANIFEST_FILE, LOG_FILE, LOCK_FILE]
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(name))
            || name.starts_with(".tmp")
    }

    pub fn exists(&self, run_id: &str) -> bool {
        Self::validate_run_id(run_id).is_ok()
            && (self.manifest_path(run_id).exists() || self.log_path(run_id).exists())
    }

    /// Persist a freshly built manifest as version 1.
    pub fn create(&self, manifest: RunManifest, actor: Actor) -> Result<RunManifest, StoreError> {
        let run_id = manifest.run_id.clone();
        Self::validate_run_id(&run_id)?;
        let run_dir = self.run_dir(&run_id);
        fs::create_dir_all(&run_dir).map_err(|e| StoreError::io("create run directory", &run_dir, e))?;

        let _lock = self.lock(&run_id)?;
        if self.exists(&run_id) {
            return Err(StoreError::AlreadyExists { run_id });
        }

        let now = Utc::now();
        let mut manifest = manifest;
        manifest.version = 1;
        manifest.updated_at = now;

        let roster = manifest.roster.join(", ");
        let entry = LogEntry {
            timestamp: now,
            run_id: run_id.clone(),
            version: 1,
            actor,
            event: "created".to_string(),
            detail: format!("roster: {}", roster),
            changes: vec![Change::Created {
                manifest: Box::new(manifest.clone()),
            }],
        };
        self.run_log(&run_id).append(&entry)?;
        self.write_snapshot(&manifest)?;

        tracing::info!(run_id = %run_id, roster = %roster, "run created");
        Ok(manifest)
    }

    /// Current manifest, after rolling forward any write the log recorded but the snapshot missed.
    pub fn load(&self, run_id: &str) -> Result<RunManifest, StoreError> {
        Self::validate_run_id(run_id)?;
        if !self.exists(run_id) {
            return Err(StoreError::NotFound {
                run_id: run_id.to_string(),
            });
        }
        let _lock = self.lock(run_id)?;
        self.recover(run_id)
    }

    /// Current manifest without touching any file.
    ///
    /// Waits out an in-flight write, but a snapshot behind the log is rolled forward in memory
    /// only and an interrupted log append is skipped rather than truncated.
    pub fn peek(&self, run_id: &str) -> Result<RunManifest, StoreError> {
        Self::validate_run_id(run_id)?;
        if !self.exists(run_id) {
            return Err(StoreError::NotFound {
                run_id: run_id.to_string(),
            });
        }
        let _lock = self.lock_shared(run_id)?;
        let entries = self.run_log(run_id).entries()?;
        let snapshot = self.read_snapshot(run_id)?;

        match (snapshot, entries.last()) {
            (Some(manifest), Some(last)) if manifest.version >= last.version => Ok(manifest),
            (Some(manifest), None) => Ok(manifest),
            (_, Some(_)) => log::replay(run_id, &entries),
            (None, None) => Err(StoreError::NotFound {
                run_id: run_id.to_string(),
            }),
        }
    }

    /// Apply the mutator's changes if and only if the stored version equals `expected_version`.
    ///
    /// The mutator sees the manifest at `expected_version` under the store lock. Returning
    /// `Ok(None)` commits nothing. Changes are validated against the state machines before
    /// anything is written; a rejected change leaves the stored manifest untouched.
    pub fn compare_and_swap<F, E>(
        &self,
        run_id: &str,
        expected_version: u64,
        actor: Actor,
        mutator: F,
    ) -> Result<Update, E>
    where
        F: FnOnce(&RunManifest) -> Result<Option<Mutation>, E>,
        E: From<StoreError>,
    {
        match self.try_swap(run_id, Some(expected_version), actor, mutator)? {
            Swap::Done(update) => Ok(update),
            Swap::Conflict { actual } => Err(StoreError::VersionConflict {
                run_id: run_id.to_string(),
                expected: expected_version,
                actual,
            }
            .into()),
        }
    }

    /// Read-modify-write with bounded retry on version conflicts.
    ///
    /// The mutator is re-run against every fresh read, so it must re-check whatever
    /// precondition made the write appropriate.
    pub fn update<F, E>(&self, run_id: &str, actor: Actor, mut mutator: F) -> Result<Update, E>
    where
        F: FnMut(&RunManifest) -> Result<Option<Mutation>, E>,
        E: From<StoreError>,
    {
        let mut last = (0, 0);
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let snapshot = self.load(run_id)?;
            match self.try_swap(run_id, Some(snapshot.version), actor, &mut mutator)? {
                Swap::Done(update) => return Ok(update),
                Swap::Conflict { actual } => {
                    tracing::debug!(
                        run_id = %run_id,
                        attempt,
                        expected = snapshot.version,
                        actual,
                        "manifest changed underneath update, retrying"
                    );
                    last = (snapshot.version, actual);
                }
            }
        }
        Err(StoreError::VersionConflict {
            run_id: run_id.to_string(),
            expected: last.0,
            actual: last.1,
        }
        .into())
    }

    pub fn read_log(&self, run_id: &str) -> Result<Vec<LogEntry>, StoreError> {
        Self::validate_run_id(run_id)?;
        if !self.exists(run_id) {
            return Err(StoreError::NotFound {
                run_id: run_id.to_string(),
            });
        }
        self.run_log(run_id).entries()
    }

    /// Rebuild the manifest from the log alone.
    pub fn replay(&self, run_id: &str) -> Result<RunManifest, StoreError> {
        let entries = self.read_log(run_id)?;
        log::replay(run_id, &entries)
    }

    /// Every run under the runs directory, oldest first. Unreadable runs are skipped.
    pub fn list(&self) -> Result<Vec<RunManifest>, StoreError> {
        let read_dir = match fs::read_dir(&self.runs_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io("read runs directory", &self.runs_dir, e)),
        };

        let mut manifests = Vec::new();
        for entry in read_dir.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(run_id) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if !self.exists(&run_id) {
                continue;
            }
            match self.peek(&run_id) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => tracing::warn!(run_id = %run_id, error = %e, "skipping unreadable run"),
            }
        }
        manifests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.run_id.cmp(&b.run_id)));
        Ok(manifests)
    }

    fn try_swap<F, E>(
        &self,
        run_id: &str,
        expected_version: Option<u64>,
        actor: Actor,
        mutator: F,
    ) -> Result<Swap, E>
    where
        F: FnOnce(&RunManifest) -> Result<Option<Mutation>, E>,
        E: From<StoreError>,
    {
        Self::validate_run_id(run_id)?;
        if !self.exists(run_id) {
            return Err(StoreError::NotFound {
                run_id: run_id.to_string(),
            }
            .into());
        }

        let _lock = self.lock(run_id)?;
        let current = self.recover(run_id)?;
        if let Some(expected) = expected_version
            && current.version != expected
        {
            return Ok(Swap::Conflict {
                actual: current.version,
            });
        }

        let Some(mutation) = mutator(&current)? else {
            return Ok(Swap::Done(Update::Unchanged(current)));
        };
        let next = self.commit(&current, actor, mutation)?;
        Ok(Swap::Done(Update::Written(next)))
    }

    /// Validate, log, then snapshot. Caller holds the lock.
    fn commit(
        &self,
        current: &RunManifest,
        actor: Actor,
        mutation: Mutation,
    ) -> Result<RunManifest, StoreError> {
        let mut next = current.clone();
        machine::apply_all(&mut next, &mutation.changes)?;

        let now = Utc::now();
        next.version = current.version + 1;
        next.updated_at = now;

        let entry = LogEntry {
            timestamp: now,
            run_id: current.run_id.clone(),
            version: next.version,
            actor,
            event: mutation.event,
            detail: mutation.detail,
            changes: mutation.changes,
        };
        self.run_log(&current.run_id).append(&entry)?;
        self.write_snapshot(&next)?;

        tracing::debug!(
            run_id = %next.run_id,
            version = next.version,
            actor = %actor,
            event = %entry.event,
            "manifest updated"
        );
        Ok(next)
    }

    /// Bring the snapshot in line with the log. Caller holds the lock.
    fn recover(&self, run_id: &str) -> Result<RunManifest, StoreError> {
        let run_log = self.run_log(run_id);
        run_log.repair_tail()?;
        let entries = run_log.entries()?;
        let snapshot = self.read_snapshot(run_id)?;

        let Some(last) = entries.last() else {
            return snapshot.ok_or_else(|| StoreError::NotFound {
                run_id: run_id.to_string(),
            });
        };

        match snapshot {
            Some(manifest) if manifest.version >= last.version => Ok(manifest),
            stale => {
                let manifest = log::replay(run_id, &entries)?;
                tracing::warn!(
                    run_id = %run_id,
                    snapshot_version = stale.map(|m| m.version),
                    log_version = manifest.version,
                    "manifest snapshot behind log, rolled forward"
                );
                self.write_snapshot(&manifest)?;
                Ok(manifest)
            }
        }
    }

    fn read_snapshot(&self, run_id: &str) -> Result<Option<RunManifest>, StoreError> {
        let path = self.manifest_path(run_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io("read manifest", &path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Parse { path, source })
    }

    fn write_snapshot(&self, manifest: &RunManifest) -> Result<(), StoreError> {
        let run_dir = self.run_dir(&manifest.run_id);
        let path = run_dir.join(MANIFEST_FILE);
        let bytes = serde_json::to_vec_pretty(manifest).map_err(|source| StoreError::Serialize {
            run_id: manifest.run_id.clone(),
            source,
        })?;

        let mut temp = NamedTempFile::new_in(&run_dir)
            .map_err(|e| StoreError::io("create temp manifest in", &run_dir, e))?;
        temp.write_all(&bytes)
            .map_err(|e| StoreError::io("write temp manifest for", &path, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io("sync temp manifest for", &path, e))?;
        temp.persist(&path)
            .map_err(|e| StoreError::io("replace manifest", &path, e.error))?;
        Ok(())
    }

    fn run_log(&self, run_id: &str) -> RunLog {
        RunLog::new(run_id, &self.log_path(run_id))
    }

    fn lock(&self, run_id: &str) -> Result<RunLock, StoreError> {
        let path = self.run_dir(run_id).join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io("open lock file", &path, e))?;
        file.lock_exclusive()
            .map_err(|e| StoreError::io("lock", &path, e))?;
        Ok(RunLock { file })
    }

    /// Shared lock for readers. `None` if the run has no lock file yet.
    fn lock_shared(&self, run_id: &str) -> Result<Option<RunLock>, StoreError> {
        let path = self.run_dir(run_id).join(LOCK_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io("open lock file", &path, e)),
        };
        FileExt::lock_shared(&file).map_err(|e| StoreError::io("lock", &path, e))?;
        Ok(Some(RunLock { file }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransitionError;
    use crate::manifest::{FlowState, RoleSeed, RoleState};
    use tempfile::tempdir;

    fn seeds() -> Vec<RoleSeed> {
        ["architect", "builder"]
            .iter()
            .map(|id| RoleSeed {
                role_id: id.to_string(),
                deliverable: format!("{}.md", id),
                required_outputs: [format!("{}.md", id)].into_iter().collect(),
            })
            .collect()
    }

    fn created(store: &ManifestStore, run_id: &str) -> RunManifest {
        store
            .create(RunManifest::new(run_id, "objective", seeds()), Actor::Operator)
            .unwrap()
    }

    fn advance(from: FlowState, to: FlowState) -> Mutation {
        Mutation::new("flow", format!("{} -> {}", from, to)).with(Change::flow(from, to))
    }

    #[test]
    fn test_create_then_load() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let manifest = created(&store, "run-1");
        assert_eq!(manifest.version, 1);

        let loaded = store.load("run-1").unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(store.read_log("run-1").unwrap().len(), 1);
    }

    #[test]
    fn test_create_twice_is_rejected() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        created(&store, "run-1");
        let err = store
            .create(RunManifest::new("run-1", "again", seeds()), Actor::Operator)
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn test_load_unknown_run() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_run_id_validation() {
        assert!(ManifestStore::validate_run_id("run-20260101-120000").is_ok());
        assert!(ManifestStore::validate_run_id("a.b_c").is_ok());
        for bad in ["", ".", "..", "a/b", "../x", "has space"] {
            assert!(ManifestStore::validate_run_id(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_cas_increments_version_and_logs() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        created(&store, "run-1");

        let update = store
            .compare_and_swap::<_, StoreError>("run-1", 1, Actor::Orchestrator, |_| {
                Ok(Some(advance(FlowState::Created, FlowState::Pending)))
            })
            .unwrap();
        assert!(update.is_written());
        assert_eq!(update.manifest().version, 2);
        assert_eq!(update.manifest().flow_state, FlowState::Pending);

        let entries = store.read_log("run-1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].actor, Actor::Orchestrator);
        assert_eq!(entries[1].version, 2);
    }

    #[test]
    fn test_cas_with_stale_version_conflicts_without_writing() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        created(&store, "run-1");
        store
            .compare_and_swap::<_, StoreError>("run-1", 1, Actor::Orchestrator, |_| {
                Ok(Some(advance(FlowState::Created, FlowState::Pending)))
            })
            .unwrap();

        let mut called = false;
        let err = store
            .compare_and_swap::<_, StoreError>("run-1", 1, Actor::Watchdog, |_| {
                called = true;
                Ok(None)
            })
            .unwrap_err();
        assert!(!called);
        match err {
            StoreError::VersionConflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("Expected VersionConflict, got {other:?}"),
        }
        assert_eq!(store.read_log("run-1").unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_transition_leaves_store_untouched() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let before = created(&store, "run-1");

        let err = store
            .compare_and_swap::<_, StoreError>("run-1", 1, Actor::Orchestrator, |_| {
                Ok(Some(advance(FlowState::Created, FlowState::Running)))
            })
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transition(TransitionError::InvalidFlowTransition { .. })
        ));
        assert_eq!(store.load("run-1").unwrap(), before);
        assert_eq!(store.read_log("run-1").unwrap().len(), 1);
    }

    #[test]
    fn test_mutator_declining_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        created(&store, "run-1");
        let update = store
            .update::<_, StoreError>("run-1", Actor::Watchdog, |_| Ok(None))
            .unwrap();
        assert!(!update.is_written());
        assert_eq!(update.into_manifest().version, 1);
        assert_eq!(store.read_log("run-1").unwrap().len(), 1);
    }

    #[test]
    fn test_update_reruns_mutator_against_fresh_state() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        created(&store, "run-1");

        let mut seen = Vec::new();
        let update = store
            .update::<_, StoreError>("run-1", Actor::Orchestrator, |m| {
                seen.push(m.version);
                Ok(Some(advance(m.flow_state, FlowState::Pending)))
            })
            .unwrap();
        assert_eq!(seen, vec![1]);
        assert_eq!(update.manifest().version, 2);
    }

    #[test]
    fn test_replay_equals_load() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        created(&store, "run-1");
        for (from, to) in [
            (FlowState::Created, FlowState::Pending),
            (FlowState::Pending, FlowState::Running),
        ] {
            store
                .update::<_, StoreError>("run-1", Actor::Orchestrator, |_| Ok(Some(advance(from, to))))
                .unwrap();
        }
        store
            .update::<_, StoreError>("run-1", Actor::Orchestrator, |_| {
                Ok(Some(Mutation::new("role_started", "architect").with(
                    Change::RoleStarted {
                        role_id: "architect".to_string(),
                        at: Utc::now(),
                    },
                )))
            })
            .unwrap();

        let loaded = store.load("run-1").unwrap();
        assert_eq!(loaded.role("architect").unwrap().state, RoleState::Running);
        assert_eq!(store.replay("run-1").unwrap(), loaded);
    }

    #[test]
    fn test_snapshot_behind_log_is_rolled_forward() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let v1 = created(&store, "run-1");
        let stale_snapshot = fs::read(store.manifest_path("run-1")).unwrap();

        store
            .compare_and_swap::<_, StoreError>("run-1", 1, Actor::Orchestrator, |_| {
                Ok(Some(advance(FlowState::Created, FlowState::Pending)))
            })
            .unwrap();

        // Simulate a crash after the log append but before the snapshot rename.
        fs::write(store.manifest_path("run-1"), stale_snapshot).unwrap();
        assert_eq!(store.read_snapshot("run-1").unwrap().unwrap(), v1);

        let recovered = store.load("run-1").unwrap();
        assert_eq!(recovered.version, 2);
        assert_eq!(recovered.flow_state, FlowState::Pending);
        assert_eq!(store.read_snapshot("run-1").unwrap().unwrap(), recovered);
    }

    #[test]
    fn test_peek_rolls_forward_without_writing() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        created(&store, "run-1");
        let stale_snapshot = fs::read(store.manifest_path("run-1")).unwrap();
        store
            .compare_and_swap::<_, StoreError>("run-1", 1, Actor::Orchestrator, |_| {
                Ok(Some(advance(FlowState::Created, FlowState::Pending)))
            })
            .unwrap();

        // Crash after the log append, plus a torn second append.
        fs::write(store.manifest_path("run-1"), &stale_snapshot).unwrap();
        let mut log_bytes = fs::read(store.log_path("run-1")).unwrap();
        log_bytes.extend_from_slice(b"{\"timestamp\":");
        fs::write(store.log_path("run-1"), &log_bytes).unwrap();

        let peeked = store.peek("run-1").unwrap();
        assert_eq!(peeked.version, 2);
        assert_eq!(peeked.flow_state, FlowState::Pending);
        assert_eq!(fs::read(store.manifest_path("run-1")).unwrap(), stale_snapshot);
        assert_eq!(fs::read(store.log_path("run-1")).unwrap(), log_bytes);

        let listed = store.list().unwrap();
        assert_eq!(listed, vec![peeked.clone()]);
        assert_eq!(fs::read(store.manifest_path("run-1")).unwrap(), stale_snapshot);

        // A writer-side load does the repair.
        assert_eq!(store.load("run-1").unwrap(), peeked);
        assert_eq!(store.read_snapshot("run-1").unwrap().unwrap(), peeked);
        assert!(fs::read(store.log_path("run-1")).unwrap().ends_with(b"\n"));
    }

    #[test]
    fn test_peek_unknown_run() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        assert!(matches!(store.peek("nope"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_missing_snapshot_is_rebuilt_from_log() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let manifest = created(&store, "run-1");
        fs::remove_file(store.manifest_path("run-1")).unwrap();
        assert_eq!(store.load("run-1").unwrap(), manifest);
    }

    #[test]
    fn test_list_returns_runs_oldest_first() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        created(&store, "run-a");
        created(&store, "run-b");
        fs::create_dir_all(dir.path().join("not-a-run")).unwrap();

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|m| m.run_id).collect();
        assert_eq!(ids, vec!["run-a".to_string(), "run-b".to_string()]);
    }
}
