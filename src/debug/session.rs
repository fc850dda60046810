use super::collector::{ContextCollector, ContextReport};
use super::fixer::{FixProposal, Fixer};
use super::DebugError;
use crate::config::{CredentialState, Settings};
use crate::execution::{ExecutionAttempt, ExecutionError, ExecutionOptions, ExecutionOrchestrator};
use crate::shared::ids::{generate_compact_id, WorkflowName};
use crate::shared::logging::EventLog;
use crate::shared::time::{iso_timestamp, now_secs, Sleeper};
use crate::transport::{TransportEnv, TransportKind};
use crate::workspace::{ActivationState, WorkflowDefinition, Workspace, WorkspaceStore};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Prepared,
    Triggered,
    Collected,
    Succeeded,
    AwaitingFix,
    Exhausted,
    Aborted,
}

impl SessionState {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (SessionState::Created, SessionState::Prepared)
                | (SessionState::Prepared, SessionState::Triggered)
                | (SessionState::Triggered, SessionState::Collected)
                | (SessionState::Collected, SessionState::Succeeded)
                | (SessionState::Collected, SessionState::AwaitingFix)
                | (SessionState::Collected, SessionState::Exhausted)
                | (SessionState::AwaitingFix, SessionState::Prepared)
                | (SessionState::AwaitingFix, SessionState::Exhausted)
        ) || (!self.is_terminal() && next == SessionState::Aborted)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Succeeded | SessionState::Exhausted | SessionState::Aborted
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Prepared => write!(f, "prepared"),
            SessionState::Triggered => write!(f, "triggered"),
            SessionState::Collected => write!(f, "collected"),
            SessionState::Succeeded => write!(f, "succeeded"),
            SessionState::AwaitingFix => write!(f, "awaiting_fix"),
            SessionState::Exhausted => write!(f, "exhausted"),
            SessionState::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Success,
    BoundReached,
    NoFixAvailable,
    UnrecoverableError,
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::BoundReached => "bound_reached",
            Self::NoFixAvailable => "no_fix_available",
            Self::UnrecoverableError => "unrecoverable_error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Cooperative stop flag, observed only between states.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugOptions {
    pub max_iterations: u32,
    pub auto_fix: bool,
    pub auto_activate: bool,
    pub execution: ExecutionOptions,
    pub payload: Value,
    /// Upper bound the collector may spend confirming completion.
    pub completion_wait: Duration,
}

impl DebugOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_iterations: settings.debug.max_iterations,
            auto_fix: false,
            auto_activate: settings.debug.auto_activate,
            execution: ExecutionOptions::from_settings(&settings.execution),
            payload: default_payload(true),
            completion_wait: settings.debug.completion_wait(),
        }
    }
}

/// Payload sent when the caller does not supply one.
pub fn default_payload(debug_mode: bool) -> Value {
    json!({
        "trigger_source": "flowloop",
        "timestamp": iso_timestamp(),
        "debug_mode": debug_mode,
    })
}

/// Everything a session borrows for its lifetime.
#[derive(Clone, Copy)]
pub struct DebugDeps<'a> {
    pub store: &'a WorkspaceStore,
    pub env: TransportEnv<'a>,
    pub sleeper: &'a dyn Sleeper,
    pub collector: &'a dyn ContextCollector,
    pub fixer: Option<&'a dyn Fixer>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIteration {
    pub index: u32,
    pub version_sequence: u64,
    pub attempt: Option<ExecutionAttempt>,
    pub report: Option<ContextReport>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugOutcome {
    pub session_id: String,
    pub workspace: WorkflowName,
    pub state: SessionState,
    pub termination: Option<TerminationReason>,
    pub detail: Option<String>,
    pub iterations: Vec<SessionIteration>,
}

/// Bounded prepare, trigger, collect, fix loop for one workspace.
pub struct DebugSession<'a> {
    id: String,
    name: WorkflowName,
    deps: DebugDeps<'a>,
    options: DebugOptions,
    cancel: CancellationToken,
    state: SessionState,
    iteration: u32,
    pending: Option<WorkflowDefinition>,
    current: Option<WorkflowDefinition>,
    workspace: Option<Workspace>,
    attempt: Option<ExecutionAttempt>,
    report: Option<ContextReport>,
    iterations: Vec<SessionIteration>,
    termination: Option<TerminationReason>,
    detail: Option<String>,
    log: EventLog,
    tool_log: EventLog,
}

impl<'a> DebugSession<'a> {
    pub fn new(
        deps: DebugDeps<'a>,
        definition: WorkflowDefinition,
        mut options: DebugOptions,
    ) -> Result<Self, DebugError> {
        options.max_iterations = options.max_iterations.max(1);
        let id = generate_compact_id("dbg", now_secs()).map_err(DebugError::SessionId)?;
        let name = definition.name().clone();
        let log = EventLog::to_file(
            deps.store
                .logs_dir(&name)
                .join(format!("debug-{id}.log")),
        );
        Ok(Self {
            id,
            name,
            deps,
            options,
            cancel: CancellationToken::new(),
            state: SessionState::Created,
            iteration: 0,
            pending: Some(definition),
            current: None,
            workspace: None,
            attempt: None,
            report: None,
            iterations: Vec::new(),
            termination: None,
            detail: None,
            log,
            tool_log: EventLog::disabled(),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Also mirror session milestones into the tool-wide log.
    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.tool_log = log;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination
    }

    pub fn last_report(&self) -> Option<&ContextReport> {
        self.report.as_ref()
    }

    pub fn log_path(&self) -> Option<&std::path::Path> {
        self.log.path()
    }

    /// Longest a `run` can take with every iteration failing slowly.
    pub fn worst_case_duration(&self) -> Duration {
        let per_iteration = self
            .options
            .execution
            .worst_case_duration(TransportKind::PRIORITY.len())
            .saturating_add(self.options.completion_wait);
        per_iteration.saturating_mul(self.options.max_iterations)
    }

    /// Steps until a terminal state, or until a fix is needed and automatic
    /// fixing is off.
    pub fn run(&mut self) -> Result<DebugOutcome, DebugError> {
        loop {
            if self.state.is_terminal() {
                break;
            }
            if self.state == SessionState::AwaitingFix && !self.options.auto_fix {
                break;
            }
            self.step()?;
        }
        Ok(self.outcome())
    }

    /// Advances exactly one state.
    pub fn step(&mut self) -> Result<SessionState, DebugError> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        if self.cancel.is_cancelled() {
            self.abort(TerminationReason::Cancelled, "cancelled");
            return Ok(self.state);
        }
        match self.state {
            SessionState::Created => {
                let Some(definition) = self.pending.take() else {
                    self.abort(TerminationReason::UnrecoverableError, "no definition to prepare");
                    return Ok(self.state);
                };
                self.prepare(definition)?;
            }
            SessionState::Prepared => self.trigger()?,
            SessionState::Triggered => self.collect()?,
            SessionState::Collected => self.evaluate()?,
            SessionState::AwaitingFix => {
                if self.options.auto_fix {
                    self.request_fix()?;
                }
            }
            SessionState::Succeeded | SessionState::Exhausted | SessionState::Aborted => {}
        }
        Ok(self.state)
    }

    /// Supplies a fix by hand while the session waits for one.
    pub fn resume_with_fix(
        &mut self,
        definition: WorkflowDefinition,
    ) -> Result<SessionState, DebugError> {
        if self.state != SessionState::AwaitingFix {
            return Err(DebugError::NotAwaitingFix { state: self.state });
        }
        if self.cancel.is_cancelled() {
            self.abort(TerminationReason::Cancelled, "cancelled");
            return Ok(self.state);
        }
        if let Some(last) = self.iterations.last_mut() {
            last.fix = Some("manual".to_string());
        }
        self.prepare(definition)?;
        Ok(self.state)
    }

    pub fn outcome(&self) -> DebugOutcome {
        DebugOutcome {
            session_id: self.id.clone(),
            workspace: self.name.clone(),
            state: self.state,
            termination: self.termination,
            detail: self.detail.clone(),
            iterations: self.iterations.clone(),
        }
    }

    fn prepare(&mut self, definition: WorkflowDefinition) -> Result<(), DebugError> {
        let definition = if definition.name() == &self.name {
            definition
        } else {
            WorkflowDefinition::new(self.name.clone(), definition.into_document())
        };
        let store = self.deps.store;
        let engine = self.deps.env.engine;
        let settings = self.deps.env.settings;

        let setup = match store.setup(&definition) {
            Ok(setup) => setup,
            Err(err) => {
                self.abort(TerminationReason::UnrecoverableError, err.to_string());
                return Ok(());
            }
        };
        let mut workspace = setup.workspace;

        if let CredentialState::Usable(_) = settings.credential() {
            match engine.import_workflow(&definition.import_body(), workspace.remote_id.as_ref()) {
                Ok(imported) => {
                    workspace = match store.record_remote_id(&self.name, &imported.id) {
                        Ok(workspace) => workspace,
                        Err(err) => {
                            self.abort(TerminationReason::UnrecoverableError, err.to_string());
                            return Ok(());
                        }
                    };
                    let mut activation = ActivationState::from_active(imported.active);
                    if self.options.auto_activate && !imported.active {
                        match engine.set_active(&imported.id, true) {
                            Ok(status) => activation = ActivationState::from_active(status.active),
                            Err(err) => self.log.warn(
                                "debug.activation_failed",
                                json!({"session": self.id, "error": err.to_string()}),
                            ),
                        }
                    }
                    workspace = store.record_activation(&self.name, activation)?;
                }
                // A network blip leaves the recorded remote state in place; the
                // trigger step decides whether anything can still run.
                Err(err) if err.failure_class().is_retryable() => self.log.warn(
                    "debug.import_deferred",
                    json!({"session": self.id, "iteration": self.iteration + 1, "error": err.to_string()}),
                ),
                Err(err) => {
                    self.abort(
                        TerminationReason::UnrecoverableError,
                        format!("import failed: {err}"),
                    );
                    return Ok(());
                }
            }
        }

        let endpoints = definition.extract_trigger_endpoints(settings.trimmed_base_url());
        workspace = store.record_endpoints(&self.name, endpoints)?;

        self.iteration += 1;
        self.iterations.push(SessionIteration {
            index: self.iteration,
            version_sequence: workspace.current_sequence(),
            attempt: None,
            report: None,
            fix: None,
        });
        self.workspace = Some(workspace);
        self.current = Some(definition);
        self.attempt = None;
        self.report = None;
        self.transition(SessionState::Prepared, None)
    }

    fn trigger(&mut self) -> Result<(), DebugError> {
        let Some(workspace) = self.workspace.as_ref() else {
            self.abort(TerminationReason::UnrecoverableError, "workspace not prepared");
            return Ok(());
        };
        let orchestrator =
            ExecutionOrchestrator::new(self.deps.env, self.deps.store, self.deps.sleeper)
                .with_event_log(self.log.clone());
        let attempt = match orchestrator.execute(workspace, &self.options.payload, &self.options.execution)
        {
            Ok(attempt) => attempt,
            Err(ExecutionError::AllTransportsExhausted { attempt }) => *attempt,
            Err(err) => {
                let message = err.to_string();
                if let ExecutionError::UnrecoverableConfig {
                    attempt: Some(attempt),
                    ..
                } = err
                {
                    if let Some(last) = self.iterations.last_mut() {
                        last.attempt = Some(*attempt);
                    }
                }
                self.abort(TerminationReason::UnrecoverableError, message);
                return Ok(());
            }
        };
        let detail = format!("{} via {:?}", attempt.outcome, attempt.transport);
        if let Some(last) = self.iterations.last_mut() {
            last.attempt = Some(attempt.clone());
        }
        self.attempt = Some(attempt);
        self.transition(SessionState::Triggered, Some(detail))
    }

    fn collect(&mut self) -> Result<(), DebugError> {
        let (Some(workspace), Some(attempt)) = (self.workspace.as_ref(), self.attempt.as_ref())
        else {
            self.abort(TerminationReason::UnrecoverableError, "nothing to collect");
            return Ok(());
        };
        // The collector records last-execution metadata, so reload afterwards.
        let report = match self.deps.collector.collect(workspace, attempt) {
            Ok(report) => report,
            Err(err) => {
                self.abort(TerminationReason::UnrecoverableError, err.to_string());
                return Ok(());
            }
        };
        if let Ok(Some(fresh)) = self.deps.store.try_load(&self.name) {
            self.workspace = Some(fresh);
        }
        let detail = report.summary.clone();
        if let Some(last) = self.iterations.last_mut() {
            last.report = Some(report.clone());
        }
        self.report = Some(report);
        self.transition(SessionState::Collected, Some(detail))
    }

    fn evaluate(&mut self) -> Result<(), DebugError> {
        let success = self
            .report
            .as_ref()
            .is_some_and(|report| report.verdict.is_success());
        if success {
            self.termination = Some(TerminationReason::Success);
            return self.transition(SessionState::Succeeded, None);
        }
        if self.iteration >= self.options.max_iterations {
            self.termination = Some(TerminationReason::BoundReached);
            self.detail = Some(format!(
                "{} of {} iterations used",
                self.iteration, self.options.max_iterations
            ));
            return self.transition(SessionState::Exhausted, self.detail.clone());
        }
        self.transition(SessionState::AwaitingFix, None)
    }

    fn request_fix(&mut self) -> Result<(), DebugError> {
        let Some(fixer) = self.deps.fixer else {
            return self.exhaust_without_fix("no fixer configured".to_string());
        };
        let (Some(report), Some(current)) = (self.report.as_ref(), self.current.as_ref()) else {
            return self.exhaust_without_fix("no report to fix from".to_string());
        };
        match fixer.propose(report, current) {
            Ok(FixProposal::Updated(definition)) => {
                if let Some(last) = self.iterations.last_mut() {
                    last.fix = Some("fixer".to_string());
                }
                self.prepare(definition)
            }
            Ok(FixProposal::NoFix { reason }) => self.exhaust_without_fix(reason),
            Err(err) => {
                self.abort(TerminationReason::UnrecoverableError, err.to_string());
                Ok(())
            }
        }
    }

    fn exhaust_without_fix(&mut self, reason: String) -> Result<(), DebugError> {
        self.termination = Some(TerminationReason::NoFixAvailable);
        self.detail = Some(reason.clone());
        self.transition(SessionState::Exhausted, Some(reason))
    }

    fn abort(&mut self, reason: TerminationReason, detail: impl Into<String>) {
        let detail = detail.into();
        self.termination = Some(reason);
        self.detail = Some(detail.clone());
        let from = self.state;
        self.state = SessionState::Aborted;
        self.log_transition(from, SessionState::Aborted, Some(&detail));
    }

    fn transition(&mut self, next: SessionState, detail: Option<String>) -> Result<(), DebugError> {
        if !self.state.can_transition_to(next) {
            return Err(DebugError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let from = self.state;
        self.state = next;
        self.log_transition(from, next, detail.as_deref());
        Ok(())
    }

    fn log_transition(&self, from: SessionState, to: SessionState, detail: Option<&str>) {
        let fields = json!({
            "session": self.id,
            "workspace": self.name.as_str(),
            "iteration": self.iteration,
            "maxIterations": self.options.max_iterations,
            "from": from.to_string(),
            "to": to.to_string(),
            "detail": detail,
        });
        self.log.info("debug.transition", fields.clone());
        if to.is_terminal() {
            self.tool_log.info("debug.finished", fields);
        }
    }
}
