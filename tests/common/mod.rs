#![allow(dead_code)]

use flowloop::config::EngineSettings;
use flowloop::engine::{
    EndpointTrigger, EngineApi, EngineError, ExecutionStarted, ExecutionState, ExecutionStatus,
    ImportedWorkflow, TriggerResponse, WorkflowStatus,
};
use flowloop::shared::ids::{RemoteWorkflowId, WorkflowName};
use flowloop::shared::process::ProcessError;
use flowloop::shared::time::Sleeper;
use flowloop::transport::{LocalRunOutput, LocalRunner};
use flowloop::workspace::{WorkflowDefinition, WorkspaceStore};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn name(raw: &str) -> WorkflowName {
    WorkflowName::parse(raw).expect("workflow name")
}

pub fn remote(raw: &str) -> RemoteWorkflowId {
    RemoteWorkflowId::parse(raw).expect("remote id")
}

/// Minimal valid definition with one webhook trigger at `path`.
pub fn webhook_definition(workflow: &str, path: &str, marker: &str) -> WorkflowDefinition {
    WorkflowDefinition::new(
        name(workflow),
        json!({
            "name": workflow,
            "nodes": [
                {
                    "name": "Webhook",
                    "type": "n8n-nodes-base.webhook",
                    "position": [0, 0],
                    "parameters": {"path": path, "httpMethod": "POST"}
                },
                {
                    "name": "Set",
                    "type": "n8n-nodes-base.set",
                    "position": [200, 0],
                    "parameters": {"marker": marker}
                }
            ],
            "connections": {
                "Webhook": {"main": [[{"node": "Set", "type": "main", "index": 0}]]}
            }
        }),
    )
}

/// Definition with no trigger node.
pub fn manual_definition(workflow: &str, marker: &str) -> WorkflowDefinition {
    WorkflowDefinition::new(
        name(workflow),
        json!({
            "name": workflow,
            "nodes": [
                {
                    "name": "Start",
                    "type": "n8n-nodes-base.manualTrigger",
                    "position": [0, 0],
                    "parameters": {"marker": marker}
                }
            ],
            "connections": {}
        }),
    )
}

pub fn settings_with_key(key: Option<&str>) -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.api_key = key.map(str::to_string);
    settings
}

pub fn store_in(root: &std::path::Path) -> WorkspaceStore {
    WorkspaceStore::new(root)
}

pub fn http_status(code: u16) -> EngineError {
    EngineError::Status {
        method: "POST".to_string(),
        url: "http://engine.test".to_string(),
        code,
        body: String::new(),
    }
}

pub fn timed_out() -> EngineError {
    EngineError::Transport {
        method: "POST".to_string(),
        url: "http://engine.test".to_string(),
        message: "timed out reading response".to_string(),
        timed_out: true,
    }
}

pub fn accepted(execution_id: &str) -> Result<TriggerResponse, EngineError> {
    Ok(TriggerResponse {
        status: 200,
        execution_id: Some(execution_id.to_string()),
        body: Some(json!({"message": "Workflow was started"})),
    })
}

pub fn started(execution_id: &str, finished: bool) -> Result<ExecutionStarted, EngineError> {
    Ok(ExecutionStarted {
        execution_id: Some(execution_id.to_string()),
        finished,
        body: None,
    })
}

pub fn execution(id: &str, state: ExecutionState, error: Option<&str>) -> ExecutionStatus {
    ExecutionStatus {
        id: id.to_string(),
        finished: state.is_terminal(),
        state,
        error: error.map(str::to_string),
        detail: json!({"id": id}),
    }
}

/// Engine double that answers from per-call queues and records every call.
/// An empty queue answers 404 so unexpected calls surface as failures.
#[derive(Default)]
pub struct ScriptedEngine {
    pub active: AtomicBool,
    pub triggers: Mutex<VecDeque<Result<TriggerResponse, EngineError>>>,
    pub executes: Mutex<VecDeque<Result<ExecutionStarted, EngineError>>>,
    pub executions: Mutex<VecDeque<Result<ExecutionStatus, EngineError>>>,
    pub imports: Mutex<VecDeque<Result<ImportedWorkflow, EngineError>>>,
    pub calls: Mutex<Vec<String>>,
    pub trigger_urls: Mutex<Vec<String>>,
    pub import_bodies: Mutex<Vec<Value>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(self) -> Self {
        self.active.store(true, Ordering::SeqCst);
        self
    }

    pub fn push_trigger(&self, result: Result<TriggerResponse, EngineError>) {
        self.triggers.lock().expect("lock").push_back(result);
    }

    pub fn push_execute(&self, result: Result<ExecutionStarted, EngineError>) {
        self.executes.lock().expect("lock").push_back(result);
    }

    pub fn push_execution(&self, result: Result<ExecutionStatus, EngineError>) {
        self.executions.lock().expect("lock").push_back(result);
    }

    pub fn push_import(&self, result: Result<ImportedWorkflow, EngineError>) {
        self.imports.lock().expect("lock").push_back(result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn record(&self, call: &str) {
        self.calls.lock().expect("lock").push(call.to_string());
    }
}

impl EngineApi for ScriptedEngine {
    fn import_workflow(
        &self,
        body: &Value,
        remote_id: Option<&RemoteWorkflowId>,
    ) -> Result<ImportedWorkflow, EngineError> {
        self.record("import");
        self.import_bodies.lock().expect("lock").push(body.clone());
        if let Some(next) = self.imports.lock().expect("lock").pop_front() {
            return next;
        }
        Ok(ImportedWorkflow {
            id: remote_id.cloned().unwrap_or_else(|| remote("wf-1")),
            name: body
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            active: self.active.load(Ordering::SeqCst),
            created: remote_id.is_none(),
        })
    }

    fn workflow_status(&self, remote_id: &RemoteWorkflowId) -> Result<WorkflowStatus, EngineError> {
        self.record("status");
        Ok(WorkflowStatus {
            id: remote_id.to_string(),
            name: String::new(),
            active: self.active.load(Ordering::SeqCst),
            updated_at: None,
        })
    }

    fn set_active(
        &self,
        remote_id: &RemoteWorkflowId,
        active: bool,
    ) -> Result<WorkflowStatus, EngineError> {
        self.record(if active { "activate" } else { "deactivate" });
        self.active.store(active, Ordering::SeqCst);
        self.workflow_status(remote_id)
    }

    fn list_workflows(&self) -> Result<Vec<WorkflowStatus>, EngineError> {
        self.record("list");
        Ok(Vec::new())
    }

    fn trigger_endpoint(&self, request: &EndpointTrigger) -> Result<TriggerResponse, EngineError> {
        self.record("trigger");
        self.trigger_urls
            .lock()
            .expect("lock")
            .push(request.url.clone());
        self.triggers
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(http_status(404)))
    }

    fn execute_workflow(
        &self,
        _remote_id: &RemoteWorkflowId,
        _payload: &Value,
        _timeout: Duration,
    ) -> Result<ExecutionStarted, EngineError> {
        self.record("execute");
        self.executes
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(http_status(404)))
    }

    fn execution_status(&self, execution_id: &str) -> Result<ExecutionStatus, EngineError> {
        self.record("execution");
        self.executions
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(execution(execution_id, ExecutionState::Running, None)))
    }
}

/// Local runner double. Unreachable unless built with `reachable`.
#[derive(Default)]
pub struct FakeLocalRunner {
    pub reachable: bool,
    pub results: Mutex<VecDeque<Result<LocalRunOutput, ProcessError>>>,
    pub runs: Mutex<u32>,
}

impl FakeLocalRunner {
    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn reachable() -> Self {
        Self {
            reachable: true,
            ..Self::default()
        }
    }

    pub fn push(&self, result: Result<LocalRunOutput, ProcessError>) {
        self.results.lock().expect("lock").push_back(result);
    }

    pub fn runs(&self) -> u32 {
        *self.runs.lock().expect("lock")
    }
}

pub fn local_success(execution_id: &str) -> Result<LocalRunOutput, ProcessError> {
    Ok(LocalRunOutput {
        success: true,
        exit_code: Some(0),
        stdout: format!("Execution id: {execution_id}\n"),
        stderr: String::new(),
        execution_id: Some(execution_id.to_string()),
    })
}

impl LocalRunner for FakeLocalRunner {
    fn reachable(&self) -> bool {
        self.reachable
    }

    fn run(
        &self,
        _remote_id: &RemoteWorkflowId,
        _payload: &Value,
        _timeout: Duration,
    ) -> Result<LocalRunOutput, ProcessError> {
        *self.runs.lock().expect("lock") += 1;
        self.results
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProcessError::MissingBinary {
                    program: "n8n".to_string(),
                })
            })
    }
}

/// Records requested pauses without sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    pub pauses: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().expect("lock").clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.pauses.lock().expect("lock").push(duration);
    }
}
