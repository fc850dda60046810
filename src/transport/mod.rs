pub mod local_process;
pub mod selector;

pub use local_process::{CommandRunner, LocalRunOutput, LocalRunner};
pub use selector::{Probe, Selection, TransportSelector};

use crate::config::{CredentialState, EndpointMode, EngineSettings};
use crate::engine::{EndpointTrigger, EngineApi};
use crate::shared::process::ProcessError;
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// The closed set of ways a remote execution can be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    TriggerEndpoint,
    PrivilegedApi,
    LocalProcess,
}

impl TransportKind {
    /// Default selection order.
    pub const PRIORITY: [TransportKind; 3] = [
        TransportKind::TriggerEndpoint,
        TransportKind::PrivilegedApi,
        TransportKind::LocalProcess,
    ];

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim() {
            "trigger-endpoint" | "webhook" => Ok(Self::TriggerEndpoint),
            "privileged-api" | "api" => Ok(Self::PrivilegedApi),
            "local-process" | "cli" => Ok(Self::LocalProcess),
            other => Err(format!(
                "unknown transport `{other}` (expected trigger-endpoint, privileged-api or local-process)"
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TriggerEndpoint => "trigger-endpoint",
            Self::PrivilegedApi => "privileged-api",
            Self::LocalProcess => "local-process",
        }
    }

    /// Starts one execution through this transport. Never retries; the
    /// returned class tells the caller what to do next.
    pub fn invoke(self, env: &TransportEnv<'_>, request: &InvokeRequest<'_>) -> TriggerResult {
        match self {
            Self::TriggerEndpoint => invoke_trigger_endpoint(env, request),
            Self::PrivilegedApi => invoke_privileged_api(env, request),
            Self::LocalProcess => invoke_local_process(env, request),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a failed invocation should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Worth retrying on the same transport after backoff.
    Transient,
    /// Exceeded the per-attempt ceiling; retried like a transient failure.
    TimedOut,
    /// The engine refused the request (authentication, validation). Advance.
    Rejected,
    /// The transport cannot serve this workflow at all. Advance.
    Unsupported,
    /// Configuration is broken for every transport. Stop.
    Fatal,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::TimedOut => "timed_out",
            Self::Rejected => "rejected",
            Self::Unsupported => "unsupported",
            Self::Fatal => "fatal",
        }
    }

    /// HTTP status to class, shared by every HTTP-speaking transport.
    pub fn from_status(code: u16) -> Self {
        match code {
            401 | 403 => Self::Rejected,
            404 | 405 | 501 => Self::Unsupported,
            408 | 425 | 429 => Self::Transient,
            500..=599 => Self::Transient,
            400..=499 => Self::Rejected,
            _ => Self::Transient,
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine acknowledged the trigger. Says nothing about whether the
/// workflow later finished, unless `completed` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acceptance {
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
    /// The acknowledgement was only sent after the run finished.
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub response: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFailure {
    pub class: FailureClass,
    pub detail: String,
}

impl TriggerFailure {
    pub fn new(class: FailureClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for TriggerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.detail)
    }
}

pub type TriggerResult = Result<Acceptance, TriggerFailure>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no transport available for workspace `{name}`: {}", .reasons.join("; "))]
    NoTransportAvailable { name: String, reasons: Vec<String> },
    #[error("unrecoverable configuration: {reason}")]
    UnrecoverableConfig { reason: String },
}

/// Collaborators a transport needs to probe or invoke.
#[derive(Clone, Copy)]
pub struct TransportEnv<'a> {
    pub engine: &'a dyn EngineApi,
    pub local: &'a dyn LocalRunner,
    pub settings: &'a EngineSettings,
}

#[derive(Debug, Clone)]
pub struct InvokeRequest<'a> {
    pub workspace: &'a Workspace,
    pub payload: &'a Value,
    pub timeout: Duration,
    pub endpoint_mode: EndpointMode,
}

fn invoke_trigger_endpoint(env: &TransportEnv<'_>, request: &InvokeRequest<'_>) -> TriggerResult {
    let Some(endpoint) = request.workspace.endpoints.first() else {
        return Err(TriggerFailure::new(
            FailureClass::Unsupported,
            "workspace has no trigger endpoint",
        ));
    };
    let trigger = EndpointTrigger {
        url: endpoint.url_for(request.endpoint_mode).to_string(),
        method: endpoint.method,
        payload: request.payload.clone(),
        timeout: request.timeout,
    };
    let response = env
        .engine
        .trigger_endpoint(&trigger)
        .map_err(|err| TriggerFailure::new(err.failure_class(), err.to_string()))?;
    Ok(Acceptance {
        execution_id: response.execution_id,
        status_code: Some(response.status),
        completed: endpoint.response_mode.waits_for_completion(),
        response: response.body,
    })
}

fn invoke_privileged_api(env: &TransportEnv<'_>, request: &InvokeRequest<'_>) -> TriggerResult {
    match env.settings.credential() {
        CredentialState::Usable(_) => {}
        CredentialState::Missing => {
            return Err(TriggerFailure::new(
                FailureClass::Unsupported,
                "no api credential configured",
            ))
        }
        CredentialState::Malformed(reason) => {
            return Err(TriggerFailure::new(FailureClass::Fatal, reason))
        }
    }
    let Some(remote_id) = request.workspace.remote_id.as_ref() else {
        return Err(TriggerFailure::new(
            FailureClass::Unsupported,
            "workflow has not been imported into the engine",
        ));
    };
    let started = env
        .engine
        .execute_workflow(remote_id, request.payload, request.timeout)
        .map_err(|err| TriggerFailure::new(err.failure_class(), err.to_string()))?;
    Ok(Acceptance {
        execution_id: started.execution_id,
        status_code: None,
        completed: started.finished,
        response: started.body,
    })
}

fn invoke_local_process(env: &TransportEnv<'_>, request: &InvokeRequest<'_>) -> TriggerResult {
    let Some(remote_id) = request.workspace.remote_id.as_ref() else {
        return Err(TriggerFailure::new(
            FailureClass::Unsupported,
            "workflow has not been imported into the engine",
        ));
    };
    let output = env
        .local
        .run(remote_id, request.payload, request.timeout)
        .map_err(|err| TriggerFailure::new(process_failure_class(&err), err.to_string()))?;
    if !output.success {
        let detail = if output.stderr.trim().is_empty() {
            format!("engine command exited with {:?}", output.exit_code)
        } else {
            format!(
                "engine command exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            )
        };
        return Err(TriggerFailure::new(FailureClass::Rejected, detail));
    }
    Ok(Acceptance {
        execution_id: output.execution_id,
        status_code: None,
        completed: true,
        response: Some(Value::String(output.stdout)),
    })
}

pub fn process_failure_class(err: &ProcessError) -> FailureClass {
    match err {
        ProcessError::MissingBinary { .. } => FailureClass::Unsupported,
        ProcessError::Timeout { .. } => FailureClass::TimedOut,
        ProcessError::Io { .. } => FailureClass::Transient,
    }
}
