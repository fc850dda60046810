use crate::config::{EngineSettings, WORKFLOW_ID_PLACEHOLDER};
use crate::shared::ids::RemoteWorkflowId;
use crate::shared::process::{run_with_timeout, CommandSpec, ProcessError};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

pub const PAYLOAD_ENV: &str = "FLOWLOOP_PAYLOAD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRunOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub execution_id: Option<String>,
}

/// Runs the engine's own command-line interface on this host.
pub trait LocalRunner: Send + Sync {
    /// Whether the configured command resolves to an executable.
    fn reachable(&self) -> bool;

    fn run(
        &self,
        remote_id: &RemoteWorkflowId,
        payload: &Value,
        timeout: Duration,
    ) -> Result<LocalRunOutput, ProcessError>;
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    command: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandRunner {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            cwd: None,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.command.clone(), settings.command_args.clone())
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn resolved_path(&self) -> Option<PathBuf> {
        which::which(&self.command).ok()
    }

    pub fn command_spec(
        &self,
        remote_id: &RemoteWorkflowId,
        payload: &Value,
        timeout: Duration,
    ) -> CommandSpec {
        let args = self
            .args
            .iter()
            .map(|arg| arg.replace(WORKFLOW_ID_PLACEHOLDER, remote_id.as_str()))
            .collect();
        let mut spec = CommandSpec::new(self.command.clone(), args, timeout);
        spec.cwd = self.cwd.clone();
        spec.env
            .insert(PAYLOAD_ENV.to_string(), payload.to_string());
        spec
    }
}

impl LocalRunner for CommandRunner {
    fn reachable(&self) -> bool {
        self.resolved_path().is_some()
    }

    fn run(
        &self,
        remote_id: &RemoteWorkflowId,
        payload: &Value,
        timeout: Duration,
    ) -> Result<LocalRunOutput, ProcessError> {
        let spec = self.command_spec(remote_id, payload, timeout);
        let output = run_with_timeout(&spec)?;
        let execution_id = parse_execution_id(&output.stdout);
        Ok(LocalRunOutput {
            success: output.success,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            execution_id,
        })
    }
}

/// Picks an execution id out of CLI output such as `Execution id: 42` or a
/// JSON object with an `executionId`/`id` field.
pub fn parse_execution_id(stdout: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(stdout.trim()) {
        for key in ["executionId", "id"] {
            match value.get(key) {
                Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
                Some(Value::Number(n)) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    stdout.lines().find_map(|line| {
        let lower = line.to_ascii_lowercase();
        let idx = lower.find("execution id")?;
        let rest = line[idx + "execution id".len()..].trim_start_matches([':', ' ', '\t']);
        let id: String = rest
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
            .collect();
        (!id.is_empty()).then_some(id)
    })
}
