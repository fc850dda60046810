use super::DebugError;
use crate::config::{CredentialState, DebugSettings};
use crate::engine::{EngineApi, ExecutionState};
use crate::execution::{AttemptOutcome, ExecutionAttempt};
use crate::shared::fs_atomic::write_json_atomic;
use crate::shared::time::{file_timestamp, now_secs, Sleeper};
use crate::workspace::{LastExecution, Workspace, WorkspaceStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No transport got the trigger accepted.
    NotAccepted,
    TimedOut,
    /// The engine ran the workflow and reported an error.
    ExecutionError,
    Canceled,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAccepted => "not_accepted",
            Self::TimedOut => "timed_out",
            Self::ExecutionError => "execution_error",
            Self::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failure { kind: FailureKind, detail: String },
    Inconclusive { detail: String },
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure { .. } => "failure",
            Self::Inconclusive { .. } => "inconclusive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextReport {
    pub attempt_id: String,
    pub verdict: Verdict,
    pub summary: String,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub evidence_path: Option<PathBuf>,
}

/// Turns a finished attempt into a verdict plus whatever evidence helps a
/// fixer. Inconclusive verdicts are treated as failures by the debug loop.
pub trait ContextCollector {
    fn collect(
        &self,
        workspace: &Workspace,
        attempt: &ExecutionAttempt,
    ) -> Result<ContextReport, DebugError>;
}

/// Decides completion from the attempt and, when the engine can be asked,
/// by polling the execution until it reaches a terminal state.
pub struct EngineContextCollector<'a> {
    engine: &'a dyn EngineApi,
    store: &'a WorkspaceStore,
    sleeper: &'a dyn Sleeper,
    can_poll: bool,
    poll_interval: Duration,
    max_polls: u32,
}

impl<'a> EngineContextCollector<'a> {
    pub fn new(
        engine: &'a dyn EngineApi,
        store: &'a WorkspaceStore,
        sleeper: &'a dyn Sleeper,
        credential: &CredentialState,
        settings: &DebugSettings,
    ) -> Self {
        Self {
            engine,
            store,
            sleeper,
            can_poll: matches!(credential, CredentialState::Usable(_)),
            poll_interval: settings.poll_interval(),
            max_polls: settings.max_polls,
        }
    }

    fn judge(&self, attempt: &ExecutionAttempt) -> (Verdict, Option<Value>) {
        if !attempt.accepted() {
            let detail = attempt
                .last_failure()
                .map(|f| format!("{} {}: {}", f.transport, f.class, f.detail))
                .unwrap_or_else(|| "no transport accepted the trigger".to_string());
            let kind = if attempt.outcome == AttemptOutcome::TimedOut {
                FailureKind::TimedOut
            } else {
                FailureKind::NotAccepted
            };
            return (Verdict::Failure { kind, detail }, None);
        }
        if attempt.engine_completed {
            return (Verdict::Success, None);
        }
        let Some(execution_id) = attempt.execution_id.as_deref() else {
            return (
                Verdict::Inconclusive {
                    detail: "accepted without an execution id; completion unknown".to_string(),
                },
                None,
            );
        };
        if !self.can_poll {
            return (
                Verdict::Inconclusive {
                    detail: format!(
                        "execution {execution_id} accepted; no api credential to confirm completion"
                    ),
                },
                None,
            );
        }

        let mut last_error = None;
        for poll in 0..self.max_polls {
            if poll > 0 {
                self.sleeper.sleep(self.poll_interval);
            }
            match self.engine.execution_status(execution_id) {
                Ok(status) if status.state.is_terminal() || status.finished => {
                    let verdict = match status.state {
                        ExecutionState::Error => Verdict::Failure {
                            kind: FailureKind::ExecutionError,
                            detail: status
                                .error
                                .clone()
                                .unwrap_or_else(|| "execution reported an error".to_string()),
                        },
                        ExecutionState::Canceled => Verdict::Failure {
                            kind: FailureKind::Canceled,
                            detail: format!("execution {execution_id} was canceled"),
                        },
                        _ => Verdict::Success,
                    };
                    return (verdict, Some(status.detail));
                }
                Ok(_) => {}
                Err(err) => last_error = Some(err.to_string()),
            }
        }
        let detail = match last_error {
            Some(err) => format!(
                "execution {execution_id} not finished after {} polls (last error: {err})",
                self.max_polls
            ),
            None => format!(
                "execution {execution_id} not finished after {} polls",
                self.max_polls
            ),
        };
        (Verdict::Inconclusive { detail }, None)
    }
}

impl ContextCollector for EngineContextCollector<'_> {
    fn collect(
        &self,
        workspace: &Workspace,
        attempt: &ExecutionAttempt,
    ) -> Result<ContextReport, DebugError> {
        let (verdict, execution_detail) = self.judge(attempt);
        let summary = match &verdict {
            Verdict::Success => format!(
                "{} via {} succeeded",
                workspace.name,
                attempt
                    .transport
                    .map(|t| t.as_str())
                    .unwrap_or("no transport")
            ),
            Verdict::Failure { kind, detail } => {
                format!("{} failed ({}): {detail}", workspace.name, kind.as_str())
            }
            Verdict::Inconclusive { detail } => format!("{} inconclusive: {detail}", workspace.name),
        };

        let file_name = format!(
            "execution_{}_{}.json",
            file_timestamp(),
            attempt.attempt_id
        );
        let path = self.store.context_dir(&workspace.name).join(&file_name);
        let logs = recent_log_evidence(self.store, workspace)?;
        let evidence = json!({
            "workspace": workspace.summary(),
            "versionSequence": workspace.current_sequence(),
            "endpoints": workspace.endpoints,
            "attempt": attempt,
            "verdict": verdict,
            "summary": summary,
            "execution": execution_detail,
            "logs": logs,
        });
        write_json_atomic(&path, &evidence).map_err(|e| super::io_error(&path, e))?;

        self.store.record_last_execution(
            &workspace.name,
            LastExecution {
                attempt_id: attempt.attempt_id.clone(),
                outcome: attempt.outcome.to_string(),
                transport: attempt.transport,
                execution_id: attempt.execution_id.clone(),
                verdict: Some(verdict.label().to_string()),
                context_file: Some(format!("context/{file_name}")),
                recorded_at: now_secs(),
            },
        )?;

        Ok(ContextReport {
            attempt_id: attempt.attempt_id.clone(),
            verdict,
            summary,
            execution_id: attempt.execution_id.clone(),
            evidence_path: Some(path),
        })
    }
}

const LOG_TAIL_LINES: usize = 40;
const LOG_FILES_SCANNED: usize = 5;
const RECENT_ERRORS: usize = 20;

/// Tail of the newest workspace log plus the latest warn/error events across
/// the few newest logs. Unreadable files are skipped.
fn recent_log_evidence(store: &WorkspaceStore, workspace: &Workspace) -> Result<Value, DebugError> {
    let files = store.log_files_newest_first(&workspace.name)?;
    let Some(newest) = files.first() else {
        return Ok(json!({"file": null, "tail": [], "recentErrors": []}));
    };

    let tail: Vec<String> = fs::read_to_string(newest)
        .map(|raw| {
            let lines: Vec<&str> = raw.lines().collect();
            let skip = lines.len().saturating_sub(LOG_TAIL_LINES);
            lines[skip..].iter().map(|line| line.to_string()).collect()
        })
        .unwrap_or_default();

    let mut errors: Vec<Value> = Vec::new();
    for file in files.iter().take(LOG_FILES_SCANNED) {
        let Ok(raw) = fs::read_to_string(file) else {
            continue;
        };
        for line in raw.lines().rev() {
            let Ok(event) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            if matches!(
                event.get("level").and_then(Value::as_str),
                Some("warn" | "error")
            ) {
                errors.push(event);
            }
        }
    }
    errors.sort_by_key(|event| {
        std::cmp::Reverse(event.get("timestamp").and_then(Value::as_i64).unwrap_or(0))
    });
    errors.truncate(RECENT_ERRORS);

    Ok(json!({
        "file": newest.file_name().and_then(|name| name.to_str()),
        "tail": tail,
        "recentErrors": errors,
    }))
}
