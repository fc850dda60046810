use super::{
    io_error, json_error, sha256_hex, ActivationState, LastExecution, TriggerEndpoint,
    VersionRecord, WorkflowDefinition, Workspace, WorkspaceError, WorkspaceSummary,
};
use crate::shared::fs_atomic::{
    atomic_write_file, read_json_if_exists, write_json_atomic, write_once, ReadJsonError,
};
use crate::shared::ids::{RemoteWorkflowId, WorkflowName};
use crate::shared::logging::EventLog;
use crate::shared::time::now_secs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const WORKFLOWS_DIR: &str = "workflows";
pub const RECORD_FILE: &str = "workspace.json";
pub const CURRENT_FILE: &str = "workflow.json";
pub const VERSIONS_DIR: &str = "versions";
pub const LOGS_DIR: &str = "logs";
pub const CONTEXT_DIR: &str = "context";
pub const ATTEMPTS_DIR: &str = "attempts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupChange {
    Created,
    Updated { previous: u64 },
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupOutcome {
    pub workspace: Workspace,
    pub change: SetupChange,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<u64>,
    pub retained: Vec<u64>,
}

/// File-backed, versioned state for every workflow name under
/// `<state_root>/workflows/`. Records are only ever replaced by atomic rename,
/// so readers see either the previous or the next record.
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    state_root: PathBuf,
    keep_last: Option<usize>,
    log: EventLog,
}

impl WorkspaceStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            keep_last: None,
            log: EventLog::disabled(),
        }
    }

    pub fn with_retention(mut self, keep_last: Option<usize>) -> Self {
        self.keep_last = keep_last;
        self
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.state_root.join(WORKFLOWS_DIR)
    }

    pub fn workspace_dir(&self, name: &WorkflowName) -> PathBuf {
        self.workflows_dir().join(name.as_str())
    }

    pub fn record_path(&self, name: &WorkflowName) -> PathBuf {
        self.workspace_dir(name).join(RECORD_FILE)
    }

    pub fn current_path(&self, name: &WorkflowName) -> PathBuf {
        self.workspace_dir(name).join(CURRENT_FILE)
    }

    pub fn version_path(&self, name: &WorkflowName, sequence: u64) -> PathBuf {
        self.workspace_dir(name).join(version_file(sequence))
    }

    pub fn logs_dir(&self, name: &WorkflowName) -> PathBuf {
        self.workspace_dir(name).join(LOGS_DIR)
    }

    pub fn context_dir(&self, name: &WorkflowName) -> PathBuf {
        self.workspace_dir(name).join(CONTEXT_DIR)
    }

    pub fn attempt_path(&self, name: &WorkflowName, attempt_id: &str) -> PathBuf {
        self.workspace_dir(name)
            .join(ATTEMPTS_DIR)
            .join(format!("{attempt_id}.json"))
    }

    /// Creates or advances the workspace for `definition.name()`. Before a new
    /// version becomes current, the outgoing current definition is confirmed on
    /// disk as an immutable history entry.
    pub fn setup(&self, definition: &WorkflowDefinition) -> Result<SetupOutcome, WorkspaceError> {
        let name = definition.name().clone();
        let bytes = definition.canonical_bytes();
        let digest = sha256_hex(&bytes);
        let now = now_secs();

        let Some(mut workspace) = self.try_load(&name)? else {
            let version = self.write_new_version(&name, 1, &bytes, &digest, definition, now)?;
            let workspace = Workspace {
                name: name.clone(),
                remote_id: None,
                activation: ActivationState::Unknown,
                versions: vec![version],
                endpoints: Vec::new(),
                created_at: now,
                updated_at: now,
                last_execution: None,
            };
            self.persist(&workspace)?;
            self.log.info(
                "workspace.created",
                json!({"workspace": name.as_str(), "sequence": 1, "digest": digest}),
            );
            return Ok(SetupOutcome {
                workspace,
                change: SetupChange::Created,
            });
        };

        let previous = match workspace.current_version() {
            Some(current) if current.digest == digest => {
                return Ok(SetupOutcome {
                    workspace,
                    change: SetupChange::Unchanged,
                });
            }
            Some(current) => current.clone(),
            None => {
                return Err(WorkspaceError::VersionMissing {
                    name: name.to_string(),
                    sequence: 0,
                })
            }
        };

        self.ensure_backup(&name, &previous)?;
        let sequence = previous.sequence + 1;
        let version = self.write_new_version(&name, sequence, &bytes, &digest, definition, now)?;
        workspace.versions.push(version);
        workspace.updated_at = now;
        self.persist(&workspace)?;
        self.log.info(
            "workspace.updated",
            json!({
                "workspace": name.as_str(),
                "previous": previous.sequence,
                "sequence": sequence,
                "digest": digest,
            }),
        );

        if let Some(keep) = self.keep_last {
            self.prune(&name, keep)?;
            workspace = self.load(&name)?;
        }

        Ok(SetupOutcome {
            workspace,
            change: SetupChange::Updated {
                previous: previous.sequence,
            },
        })
    }

    /// The outgoing version must exist on disk with its recorded digest. A
    /// missing file is restored from `workflow.json` when that copy matches.
    fn ensure_backup(
        &self,
        name: &WorkflowName,
        previous: &VersionRecord,
    ) -> Result<(), WorkspaceError> {
        let path = self.workspace_dir(name).join(&previous.file);
        match fs::read(&path) {
            Ok(existing) if sha256_hex(&existing) == previous.digest => return Ok(()),
            Ok(_) => {
                return Err(WorkspaceError::DigestMismatch {
                    name: name.to_string(),
                    sequence: previous.sequence,
                })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_error(&path, err)),
        }

        let current_path = self.current_path(name);
        let current = fs::read(&current_path).map_err(|e| io_error(&current_path, e))?;
        if sha256_hex(&current) != previous.digest {
            return Err(WorkspaceError::VersionMissing {
                name: name.to_string(),
                sequence: previous.sequence,
            });
        }
        write_once(&path, &current).map_err(|e| version_write_error(&path, e))?;
        self.log.warn(
            "workspace.backup_restored",
            json!({"workspace": name.as_str(), "sequence": previous.sequence}),
        );
        Ok(())
    }

    fn write_new_version(
        &self,
        name: &WorkflowName,
        sequence: u64,
        bytes: &[u8],
        digest: &str,
        definition: &WorkflowDefinition,
        now: i64,
    ) -> Result<VersionRecord, WorkspaceError> {
        let path = self.version_path(name, sequence);
        // A file at an unrecorded sequence is left over from an interrupted
        // setup and carries no history.
        atomic_write_file(&path, bytes).map_err(|e| io_error(&path, e))?;
        let current_path = self.current_path(name);
        atomic_write_file(&current_path, bytes).map_err(|e| io_error(&current_path, e))?;
        Ok(VersionRecord {
            sequence,
            created_at: now,
            digest: digest.to_string(),
            file: version_file(sequence),
            node_count: definition.node_count(),
        })
    }

    pub fn try_load(&self, name: &WorkflowName) -> Result<Option<Workspace>, WorkspaceError> {
        let path = self.record_path(name);
        read_json_if_exists(&path).map_err(|err| match err {
            ReadJsonError::Io(e) => io_error(&path, e),
            ReadJsonError::Json(e) => json_error(&path, e),
        })
    }

    pub fn load(&self, name: &WorkflowName) -> Result<Workspace, WorkspaceError> {
        self.try_load(name)?.ok_or_else(|| WorkspaceError::NotFound {
            name: name.to_string(),
        })
    }

    pub fn persist(&self, workspace: &Workspace) -> Result<(), WorkspaceError> {
        let path = self.record_path(&workspace.name);
        write_json_atomic(&path, workspace).map_err(|e| io_error(&path, e))
    }

    pub fn current_definition(
        &self,
        name: &WorkflowName,
    ) -> Result<WorkflowDefinition, WorkspaceError> {
        let workspace = self.load(name)?;
        let sequence = workspace.current_sequence();
        self.read_version(&workspace, sequence)
    }

    pub fn load_version(
        &self,
        name: &WorkflowName,
        sequence: u64,
    ) -> Result<WorkflowDefinition, WorkspaceError> {
        let workspace = self.load(name)?;
        self.read_version(&workspace, sequence)
    }

    fn read_version(
        &self,
        workspace: &Workspace,
        sequence: u64,
    ) -> Result<WorkflowDefinition, WorkspaceError> {
        let record = workspace
            .version(sequence)
            .ok_or_else(|| WorkspaceError::VersionMissing {
                name: workspace.name.to_string(),
                sequence,
            })?;
        let path = self.workspace_dir(&workspace.name).join(&record.file);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(WorkspaceError::VersionMissing {
                    name: workspace.name.to_string(),
                    sequence,
                })
            }
            Err(err) => return Err(io_error(&path, err)),
        };
        if sha256_hex(&bytes) != record.digest {
            return Err(WorkspaceError::DigestMismatch {
                name: workspace.name.to_string(),
                sequence,
            });
        }
        let document = serde_json::from_slice(&bytes).map_err(|e| json_error(&path, e))?;
        Ok(WorkflowDefinition::new(workspace.name.clone(), document))
    }

    /// Binds the engine's identifier to this workspace. Rebinding to a
    /// different id, or taking an id another workspace holds, is a conflict.
    pub fn record_remote_id(
        &self,
        name: &WorkflowName,
        remote_id: &RemoteWorkflowId,
    ) -> Result<Workspace, WorkspaceError> {
        let mut workspace = self.load(name)?;
        match &workspace.remote_id {
            Some(existing) if existing == remote_id => return Ok(workspace),
            Some(existing) => {
                return Err(WorkspaceError::Conflict {
                    name: name.to_string(),
                    detail: format!(
                        "already bound to remote id `{existing}`, refusing `{remote_id}`"
                    ),
                })
            }
            None => {}
        }
        for other in self.list()? {
            if other.name != *name && other.remote_id.as_ref() == Some(remote_id) {
                return Err(WorkspaceError::Conflict {
                    name: name.to_string(),
                    detail: format!(
                        "remote id `{remote_id}` is already bound to workspace `{}`",
                        other.name
                    ),
                });
            }
        }
        workspace.remote_id = Some(remote_id.clone());
        workspace.updated_at = now_secs();
        self.persist(&workspace)?;
        self.log.info(
            "workspace.remote_id_recorded",
            json!({"workspace": name.as_str(), "remoteId": remote_id.as_str()}),
        );
        Ok(workspace)
    }

    pub fn record_activation(
        &self,
        name: &WorkflowName,
        activation: ActivationState,
    ) -> Result<Workspace, WorkspaceError> {
        self.update(name, |workspace| workspace.activation = activation)
    }

    pub fn record_endpoints(
        &self,
        name: &WorkflowName,
        endpoints: Vec<TriggerEndpoint>,
    ) -> Result<Workspace, WorkspaceError> {
        self.update(name, move |workspace| workspace.endpoints = endpoints)
    }

    pub fn record_last_execution(
        &self,
        name: &WorkflowName,
        last: LastExecution,
    ) -> Result<Workspace, WorkspaceError> {
        self.update(name, move |workspace| workspace.last_execution = Some(last))
    }

    fn update(
        &self,
        name: &WorkflowName,
        apply: impl FnOnce(&mut Workspace),
    ) -> Result<Workspace, WorkspaceError> {
        let mut workspace = self.load(name)?;
        apply(&mut workspace);
        workspace.updated_at = now_secs();
        self.persist(&workspace)?;
        Ok(workspace)
    }

    /// Keeps the `keep_last` most recent historical versions plus the current
    /// one. The record is rewritten before any file is removed, so a crash
    /// leaves unreferenced files rather than dangling references.
    pub fn prune(&self, name: &WorkflowName, keep_last: usize) -> Result<PruneReport, WorkspaceError> {
        let mut workspace = self.load(name)?;
        let current = workspace.current_sequence();
        let mut historical: Vec<VersionRecord> = workspace
            .versions
            .iter()
            .filter(|v| v.sequence != current)
            .cloned()
            .collect();
        historical.sort_by_key(|v| v.sequence);
        let excess = historical.len().saturating_sub(keep_last);
        let doomed: Vec<VersionRecord> = historical.into_iter().take(excess).collect();
        if doomed.is_empty() {
            return Ok(PruneReport {
                removed: Vec::new(),
                retained: workspace.versions.iter().map(|v| v.sequence).collect(),
            });
        }

        workspace
            .versions
            .retain(|v| !doomed.iter().any(|d| d.sequence == v.sequence));
        workspace.updated_at = now_secs();
        self.persist(&workspace)?;

        let dir = self.workspace_dir(name);
        for version in &doomed {
            let path = dir.join(&version.file);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_error(&path, err)),
            }
        }
        let report = PruneReport {
            removed: doomed.iter().map(|v| v.sequence).collect(),
            retained: workspace.versions.iter().map(|v| v.sequence).collect(),
        };
        self.log.info(
            "workspace.pruned",
            json!({"workspace": name.as_str(), "removed": report.removed, "keepLast": keep_last}),
        );
        Ok(report)
    }

    /// Read-only snapshot of every workspace with a committed record.
    /// Directories still being created by a concurrent setup are skipped.
    pub fn list(&self) -> Result<Vec<WorkspaceSummary>, WorkspaceError> {
        let dir = self.workflows_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&dir, err)),
        };
        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&dir, e))?;
            let file_name = entry.file_name();
            let Some(raw_name) = file_name.to_str() else {
                continue;
            };
            if raw_name.starts_with('.') {
                continue;
            }
            let Ok(name) = WorkflowName::parse(raw_name) else {
                continue;
            };
            if let Some(workspace) = self.try_load(&name)? {
                summaries.push(workspace.summary());
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    /// Files under `logs/`, most recently modified first.
    pub fn log_files_newest_first(&self, name: &WorkflowName) -> Result<Vec<PathBuf>, WorkspaceError> {
        let dir = self.logs_dir(name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&dir, err)),
        };
        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&dir, e))?;
            let path = entry.path();
            let metadata = entry.metadata().map_err(|e| io_error(&path, e))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, path));
        }
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    /// Removes all but the `keep_last` newest files under the workspace's
    /// `logs/` directory. Returns the removed paths.
    pub fn cleanup_logs(
        &self,
        name: &WorkflowName,
        keep_last: usize,
    ) -> Result<Vec<PathBuf>, WorkspaceError> {
        self.load(name)?;
        let files = self.log_files_newest_first(name)?;
        let mut removed = Vec::new();
        for path in files.into_iter().skip(keep_last) {
            fs::remove_file(&path).map_err(|e| io_error(&path, e))?;
            removed.push(path);
        }
        if !removed.is_empty() {
            self.log.info(
                "workspace.logs_cleaned",
                json!({"workspace": name.as_str(), "removed": removed.len(), "keepLast": keep_last}),
            );
        }
        Ok(removed)
    }

    pub fn persist_attempt<T: Serialize>(
        &self,
        name: &WorkflowName,
        attempt_id: &str,
        attempt: &T,
    ) -> Result<PathBuf, WorkspaceError> {
        let path = self.attempt_path(name, attempt_id);
        write_json_atomic(&path, attempt).map_err(|e| io_error(&path, e))?;
        Ok(path)
    }

    pub fn load_attempt<T: DeserializeOwned>(
        &self,
        name: &WorkflowName,
        attempt_id: &str,
    ) -> Result<T, WorkspaceError> {
        let path = self.attempt_path(name, attempt_id);
        let raw = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        serde_json::from_str(&raw).map_err(|e| json_error(&path, e))
    }
}

fn version_file(sequence: u64) -> String {
    format!("{VERSIONS_DIR}/v{sequence}_workflow.json")
}

fn version_write_error(path: &Path, err: std::io::Error) -> WorkspaceError {
    if err.kind() == ErrorKind::AlreadyExists {
        WorkspaceError::VersionImmutable {
            path: path.display().to_string(),
        }
    } else {
        io_error(path, err)
    }
}
