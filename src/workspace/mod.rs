pub mod definition;
pub mod endpoint;
pub mod store;

pub use definition::{sha256_hex, WorkflowDefinition, READ_ONLY_IMPORT_FIELDS};
pub use endpoint::{HttpMethod, ResponseMode, TriggerEndpoint};
pub use store::{PruneReport, SetupChange, SetupOutcome, WorkspaceStore};

use crate::shared::ids::{RemoteWorkflowId, WorkflowName};
use crate::transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    #[default]
    Unknown,
    Active,
    Inactive,
}

impl ActivationState {
    pub fn from_active(active: bool) -> Self {
        if active {
            Self::Active
        } else {
            Self::Inactive
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable snapshot in a workspace's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub sequence: u64,
    pub created_at: i64,
    pub digest: String,
    /// Path relative to the workspace directory.
    pub file: String,
    #[serde(default)]
    pub node_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastExecution {
    pub attempt_id: String,
    pub outcome: String,
    #[serde(default)]
    pub transport: Option<TransportKind>,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub verdict: Option<String>,
    #[serde(default)]
    pub context_file: Option<String>,
    pub recorded_at: i64,
}

/// The durable record of one workflow name, stored as `workspace.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub name: WorkflowName,
    #[serde(default)]
    pub remote_id: Option<RemoteWorkflowId>,
    #[serde(default)]
    pub activation: ActivationState,
    #[serde(default)]
    pub versions: Vec<VersionRecord>,
    #[serde(default)]
    pub endpoints: Vec<TriggerEndpoint>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub last_execution: Option<LastExecution>,
}

impl Workspace {
    pub fn current_version(&self) -> Option<&VersionRecord> {
        self.versions.iter().max_by_key(|v| v.sequence)
    }

    pub fn current_sequence(&self) -> u64 {
        self.current_version().map(|v| v.sequence).unwrap_or(0)
    }

    pub fn version(&self, sequence: u64) -> Option<&VersionRecord> {
        self.versions.iter().find(|v| v.sequence == sequence)
    }

    pub fn summary(&self) -> WorkspaceSummary {
        WorkspaceSummary {
            name: self.name.clone(),
            remote_id: self.remote_id.clone(),
            activation: self.activation,
            current_sequence: self.current_sequence(),
            version_count: self.versions.len(),
            endpoint_count: self.endpoints.len(),
            updated_at: self.updated_at,
            last_outcome: self.last_execution.as_ref().map(|e| e.outcome.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSummary {
    pub name: WorkflowName,
    pub remote_id: Option<RemoteWorkflowId>,
    pub activation: ActivationState,
    pub current_sequence: u64,
    pub version_count: usize,
    pub endpoint_count: usize,
    pub updated_at: i64,
    pub last_outcome: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace `{name}` not found")]
    NotFound { name: String },
    #[error("workspace `{name}` conflict: {detail}")]
    Conflict { name: String, detail: String },
    #[error("invalid workflow name `{name}`: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("invalid workflow definition `{name}`: {reason}")]
    InvalidDefinition { name: String, reason: String },
    #[error("workspace `{name}` has no version {sequence}")]
    VersionMissing { name: String, sequence: u64 },
    #[error("version file {path} already exists with different content")]
    VersionImmutable { path: String },
    #[error("workspace `{name}` version {sequence} does not match its recorded digest")]
    DigestMismatch { name: String, sequence: u64 },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> WorkspaceError {
    WorkspaceError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) fn json_error(path: &Path, source: serde_json::Error) -> WorkspaceError {
    WorkspaceError::Json {
        path: path.display().to_string(),
        source,
    }
}
