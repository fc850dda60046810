use crate::config::EndpointMode;
use crate::shared::ids::WorkflowName;
use crate::transport::{FailureClass, TransportKind, TriggerFailure};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    /// The engine accepted the trigger. Completion is judged separately.
    Succeeded,
    Failed,
    TimedOut,
}

impl AttemptOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Succeeded => write!(f, "succeeded (accepted)"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed-out"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAttemptOutcome {
    Accepted,
    Failed,
}

/// One invocation of one transport inside an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAttempt {
    pub transport: TransportKind,
    pub retry_index: u32,
    #[serde(default)]
    pub endpoint_mode: Option<EndpointMode>,
    pub outcome: SubAttemptOutcome,
    #[serde(default)]
    pub failure_class: Option<FailureClass>,
    #[serde(default)]
    pub detail: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub backoff_before_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportFailureRecord {
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_mode: Option<EndpointMode>,
    pub class: FailureClass,
    pub detail: String,
}

/// The record of one `execute` call, every retry and fallback included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionAttempt {
    pub attempt_id: String,
    pub workspace: WorkflowName,
    /// The transport that produced the final result, if any was tried.
    #[serde(default)]
    pub transport: Option<TransportKind>,
    pub started_at: i64,
    #[serde(default)]
    pub ended_at: Option<i64>,
    pub outcome: AttemptOutcome,
    pub retry_count: u32,
    #[serde(default)]
    pub execution_id: Option<String>,
    /// Where the raw engine response was saved, relative to the workspace.
    #[serde(default)]
    pub response_ref: Option<String>,
    /// The acceptance itself proved the run finished.
    #[serde(default)]
    pub engine_completed: bool,
    #[serde(default)]
    pub sub_attempts: Vec<SubAttempt>,
    /// Last failure seen on each transport that failed.
    #[serde(default)]
    pub transport_failures: Vec<TransportFailureRecord>,
}

impl ExecutionAttempt {
    pub fn new(attempt_id: impl Into<String>, workspace: WorkflowName, started_at: i64) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            workspace,
            transport: None,
            started_at,
            ended_at: None,
            outcome: AttemptOutcome::Pending,
            retry_count: 0,
            execution_id: None,
            response_ref: None,
            engine_completed: false,
            sub_attempts: Vec::new(),
            transport_failures: Vec::new(),
        }
    }

    pub fn accepted(&self) -> bool {
        self.outcome == AttemptOutcome::Succeeded
    }

    /// Keeps the latest failure per transport and endpoint mode, so a
    /// production miss that caused a test-endpoint fallback stays on record.
    pub fn record_transport_failure(
        &mut self,
        transport: TransportKind,
        endpoint_mode: Option<EndpointMode>,
        failure: &TriggerFailure,
    ) {
        self.transport_failures
            .retain(|f| f.transport != transport || f.endpoint_mode != endpoint_mode);
        self.transport_failures.push(TransportFailureRecord {
            transport,
            endpoint_mode,
            class: failure.class,
            detail: failure.detail.clone(),
        });
    }

    pub fn last_failure(&self) -> Option<&TransportFailureRecord> {
        self.transport_failures.last()
    }

    pub fn sub_attempts_for(&self, transport: TransportKind) -> impl Iterator<Item = &SubAttempt> {
        self.sub_attempts
            .iter()
            .filter(move |s| s.transport == transport)
    }

    pub fn finish(&mut self, outcome: AttemptOutcome, ended_at: i64) {
        self.outcome = outcome;
        self.ended_at = Some(ended_at);
        self.retry_count = self
            .sub_attempts
            .iter()
            .filter(|s| s.retry_index > 0)
            .count() as u32;
    }
}
