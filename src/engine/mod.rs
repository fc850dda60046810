pub mod http;

pub use http::HttpEngineClient;

use crate::shared::ids::RemoteWorkflowId;
use crate::transport::FailureClass;
use crate::workspace::HttpMethod;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const API_KEY_HEADER: &str = "X-N8N-API-KEY";
pub const EXECUTION_ID_HEADER: &str = "x-n8n-execution-id";

/// The remote workflow engine. Every call is synchronous and bounded by the
/// client's own request timeout unless a call takes an explicit one.
pub trait EngineApi: Send + Sync {
    /// Creates the workflow when `remote_id` is `None`, updates it otherwise.
    fn import_workflow(
        &self,
        body: &Value,
        remote_id: Option<&RemoteWorkflowId>,
    ) -> Result<ImportedWorkflow, EngineError>;

    fn workflow_status(&self, remote_id: &RemoteWorkflowId) -> Result<WorkflowStatus, EngineError>;

    /// Requests the activation change and confirms it with a fresh status read.
    fn set_active(
        &self,
        remote_id: &RemoteWorkflowId,
        active: bool,
    ) -> Result<WorkflowStatus, EngineError>;

    fn list_workflows(&self) -> Result<Vec<WorkflowStatus>, EngineError>;

    fn trigger_endpoint(&self, request: &EndpointTrigger) -> Result<TriggerResponse, EngineError>;

    fn execute_workflow(
        &self,
        remote_id: &RemoteWorkflowId,
        payload: &Value,
        timeout: Duration,
    ) -> Result<ExecutionStarted, EngineError>;

    fn execution_status(&self, execution_id: &str) -> Result<ExecutionStatus, EngineError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedWorkflow {
    pub id: RemoteWorkflowId,
    pub name: String,
    pub active: bool,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointTrigger {
    pub url: String,
    pub method: HttpMethod,
    pub payload: Value,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerResponse {
    pub status: u16,
    pub execution_id: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStarted {
    pub execution_id: Option<String>,
    pub finished: bool,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Waiting,
    Success,
    Error,
    Canceled,
    Unknown,
}

impl ExecutionState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" | "new" => Self::Running,
            "waiting" => Self::Waiting,
            "success" => Self::Success,
            "error" | "crashed" | "failed" => Self::Error,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Canceled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStatus {
    pub id: String,
    pub finished: bool,
    pub state: ExecutionState,
    pub error: Option<String>,
    pub detail: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("engine returned HTTP {code} for {method} {url}: {body}")]
    Status {
        method: String,
        url: String,
        code: u16,
        body: String,
    },
    #[error("request {method} {url} failed: {message}")]
    Transport {
        method: String,
        url: String,
        message: String,
        timed_out: bool,
    },
    #[error("unexpected engine response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("engine api key is not configured")]
    MissingCredential,
    #[error("engine api key is malformed: {0}")]
    MalformedCredential(String),
    #[error("workflow `{id}` did not become {expected} after the request")]
    ActivationNotApplied { id: String, expected: String },
}

impl EngineError {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Status { code, .. } => FailureClass::from_status(*code),
            Self::Transport { timed_out, .. } => {
                if *timed_out {
                    FailureClass::TimedOut
                } else {
                    FailureClass::Transient
                }
            }
            Self::Decode { .. } => FailureClass::Transient,
            Self::MissingCredential => FailureClass::Unsupported,
            Self::MalformedCredential(_) => FailureClass::Fatal,
            Self::ActivationNotApplied { .. } => FailureClass::Rejected,
        }
    }
}
