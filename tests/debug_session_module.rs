mod common;

use common::{
    accepted, execution, http_status, name, remote, settings_with_key, store_in,
    webhook_definition, FakeLocalRunner, RecordingSleeper, ScriptedEngine,
};
use flowloop::config::{DebugSettings, EngineSettings, Settings};
use flowloop::debug::{
    CancellationToken, ContextReport, DebugDeps, DebugError, DebugOptions, DebugSession,
    EngineContextCollector, FailureKind, FixProposal, Fixer, SessionState, TerminationReason,
    Verdict,
};
use flowloop::engine::{ExecutionState, ImportedWorkflow};
use flowloop::workspace::{WorkflowDefinition, WorkspaceStore};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::tempdir;

/// Always proposes a new revision of the definition.
#[derive(Default)]
struct RevisingFixer {
    calls: Mutex<u32>,
}

impl Fixer for RevisingFixer {
    fn propose(
        &self,
        _report: &ContextReport,
        _current: &WorkflowDefinition,
    ) -> Result<FixProposal, DebugError> {
        let mut calls = self.calls.lock().expect("lock");
        *calls += 1;
        Ok(FixProposal::Updated(webhook_definition(
            "orders",
            "orders-hook",
            &format!("fix-{calls}"),
        )))
    }
}

struct GiveUpFixer;

impl Fixer for GiveUpFixer {
    fn propose(
        &self,
        _report: &ContextReport,
        _current: &WorkflowDefinition,
    ) -> Result<FixProposal, DebugError> {
        Ok(FixProposal::NoFix {
            reason: "nothing to change".to_string(),
        })
    }
}

fn options(max_iterations: u32, auto_fix: bool) -> DebugOptions {
    let mut options = DebugOptions::from_settings(&Settings::default());
    options.max_iterations = max_iterations;
    options.auto_fix = auto_fix;
    options.execution.max_retries = 0;
    options.execution.backoff_unit = Duration::ZERO;
    options
}

fn fast_polling() -> DebugSettings {
    DebugSettings {
        poll_interval_ms: 1,
        max_polls: 3,
        ..DebugSettings::default()
    }
}

fn run_session(
    store: &WorkspaceStore,
    engine: &ScriptedEngine,
    settings: &EngineSettings,
    fixer: Option<&dyn Fixer>,
    options: DebugOptions,
) -> (flowloop::debug::DebugOutcome, u32) {
    let local = FakeLocalRunner::unreachable();
    let sleeper = RecordingSleeper::default();
    let collector =
        EngineContextCollector::new(engine, store, &sleeper, &settings.credential(), &fast_polling());
    let deps = DebugDeps {
        store,
        env: flowloop::transport::TransportEnv {
            engine,
            local: &local,
            settings,
        },
        sleeper: &sleeper,
        collector: &collector,
        fixer,
    };
    let mut session = DebugSession::new(
        deps,
        webhook_definition("orders", "orders-hook", "initial"),
        options,
    )
    .expect("session");
    let outcome = session.run().expect("run");
    let iteration = session.iteration();
    (outcome, iteration)
}

#[test]
fn first_iteration_success_terminates_with_success() {
    let dir = tempdir().expect("tempdir");
    let store = store_in(dir.path());
    let engine = ScriptedEngine::new();
    engine.push_trigger(accepted("ex-1"));
    engine.push_execution(Ok(execution("ex-1", ExecutionState::Success, None)));
    let settings = settings_with_key(Some("secret"));

    let (outcome, iteration) = run_session(&store, &engine, &settings, None, options(3, true));

    assert_eq!(outcome.state, SessionState::Succeeded);
    assert_eq!(outcome.termination, Some(TerminationReason::Success));
    assert_eq!(iteration, 1);
    assert_eq!(engine.count("import"), 1);
    assert_eq!(engine.count("activate"), 1);
    let report = outcome.iterations[0].report.as_ref().expect("report");
    assert_eq!(report.verdict, Verdict::Success);
    assert!(report.evidence_path.as_ref().expect("evidence").is_file());

    let workspace = store.load(&name("orders")).expect("workspace");
    assert_eq!(
        workspace.remote_id.as_ref().map(|id| id.as_str()),
        Some("wf-1")
    );
    let last = workspace.last_execution.expect("last execution");
    assert_eq!(last.verdict.as_deref(), Some("success"));
}

#[test]
fn failing_workflow_is_exhausted_after_exactly_max_iterations() {
    let dir = tempdir().expect("tempdir");
    let store = store_in(dir.path());
    let engine = ScriptedEngine::new();
    let settings = settings_with_key(Some("secret"));
    let fixer = RevisingFixer::default();

    let (outcome, iteration) =
        run_session(&store, &engine, &settings, Some(&fixer), options(3, true));

    assert_eq!(outcome.state, SessionState::Exhausted);
    assert_eq!(outcome.termination, Some(TerminationReason::BoundReached));
    assert_eq!(iteration, 3);
    assert_eq!(outcome.iterations.len(), 3);
    assert_eq!(*fixer.calls.lock().expect("lock"), 2);
    let sequences: Vec<u64> = outcome
        .iterations
        .iter()
        .map(|i| i.version_sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    for iteration in &outcome.iterations {
        let report = iteration.report.as_ref().expect("report");
        assert!(matches!(
            report.verdict,
            Verdict::Failure {
                kind: FailureKind::NotAccepted,
                ..
            }
        ));
    }
}

#[test]
fn single_iteration_bound_never_asks_for_a_fix() {
    let dir = tempdir().expect("tempdir");
    let store = store_in(dir.path());
    let engine = ScriptedEngine::new();
    let settings = settings_with_key(Some("secret"));
    let fixer = RevisingFixer::default();

    let (outcome, _) = run_session(&store, &engine, &settings, Some(&fixer), options(1, true));
    assert_eq!(outcome.termination, Some(TerminationReason::BoundReached));
    assert_eq!(*fixer.calls.lock().expect("lock"), 0);
}

#[test]
fn fixer_without_a_proposal_ends_the_session_early() {
    let dir = tempdir().expect("tempdir");
    let store = store_in(dir.path());
    let engine = ScriptedEngine::new();
    let settings = settings_with_key(Some("secret"));

    let (outcome, iteration) =
        run_session(&store, &engine, &settings, Some(&GiveUpFixer), options(5, true));
    assert_eq!(outcome.state, SessionState::Exhausted);
    assert_eq!(outcome.termination, Some(TerminationReason::NoFixAvailable));
    assert_eq!(outcome.detail.as_deref(), Some("nothing to change"));
    assert_eq!(iteration, 1);
}

#[test]
fn engine_reported_error_is_a_failed_iteration() {
    let dir = tempdir().expect("tempdir");
    let store = store_in(dir.path());
    let engine = ScriptedEngine::new();
    engine.push_trigger(accepted("ex-9"));
    engine.push_execution(Ok(execution(
        "ex-9",
        ExecutionState::Error,
        Some("node Set failed"),
    )));
    let settings = settings_with_key(Some("secret"));

    let (outcome, _) = run_session(&store, &engine, &settings, None, options(1, false));
    let report = outcome.iterations[0].report.as_ref().expect("report");
    match &report.verdict {
        Verdict::Failure { kind, detail } => {
            assert_eq!(*kind, FailureKind::ExecutionError);
            assert_eq!(detail, "node Set failed");
        }
        other => panic!("unexpected verdict: {other:?}"),
    }
    assert_eq!(outcome.state, SessionState::Exhausted);
}

#[test]
fn unfinished_execution_is_inconclusive_and_not_success() {
    let dir = tempdir().expect("tempdir");
    let store = store_in(dir.path());
    let engine = ScriptedEngine::new();
    engine.push_trigger(accepted("ex-10"));
    let settings = settings_with_key(Some("secret"));

    let (outcome, _) = run_session(&store, &engine, &settings, None, options(1, false));
    let report = outcome.iterations[0].report.as_ref().expect("report");
    assert!(matches!(report.verdict, Verdict::Inconclusive { .. }));
    assert_eq!(outcome.state, SessionState::Exhausted);
    assert_eq!(engine.count("execution"), 3);
}

#[test]
fn malformed_credential_aborts_the_session() {
    let dir = tempdir().expect("tempdir");
    let store = store_in(dir.path());
    let engine = ScriptedEngine::new();
    let settings = settings_with_key(Some("bad\tkey"));

    let (outcome, _) = run_session(&store, &engine, &settings, None, options(3, true));
    assert_eq!(outcome.state, SessionState::Aborted);
    assert_eq!(
        outcome.termination,
        Some(TerminationReason::UnrecoverableError)
    );
    assert_eq!(engine.count("import"), 0);
}

#[test]
fn manual_fix_resumes_a_waiting_session() {
    let dir = tempdir().expect("tempdir");
    let store = store_in(dir.path());
    let engine = ScriptedEngine::new();
    let settings = settings_with_key(Some("secret"));
    let local = FakeLocalRunner::unreachable();
    let sleeper = RecordingSleeper::default();
    let collector = EngineContextCollector::new(
        &engine,
        &store,
        &sleeper,
        &settings.credential(),
        &fast_polling(),
    );
    let deps = DebugDeps {
        store: &store,
        env: flowloop::transport::TransportEnv {
            engine: &engine,
            local: &local,
            settings: &settings,
        },
        sleeper: &sleeper,
        collector: &collector,
        fixer: None,
    };
    let mut session = DebugSession::new(
        deps,
        webhook_definition("orders", "orders-hook", "initial"),
        options(2, false),
    )
    .expect("session");

    let err = session
        .resume_with_fix(webhook_definition("orders", "orders-hook", "early"))
        .expect_err("not waiting yet");
    assert!(matches!(err, DebugError::NotAwaitingFix { .. }));

    let outcome = session.run().expect("first run");
    assert_eq!(outcome.state, SessionState::AwaitingFix);
    assert_eq!(outcome.session_id, session.id());
    assert!(session.termination().is_none());
    assert!(session
        .last_report()
        .is_some_and(|report| !report.verdict.is_success()));

    engine.push_trigger(accepted("ex-2"));
    engine.push_execution(Ok(execution("ex-2", ExecutionState::Success, None)));
    let state = session
        .resume_with_fix(webhook_definition("orders", "orders-hook", "manual"))
        .expect("resume");
    assert_eq!(state, SessionState::Prepared);

    let outcome = session.run().expect("second run");
    assert_eq!(outcome.state, SessionState::Succeeded);
    assert_eq!(outcome.iterations.len(), 2);
    assert_eq!(outcome.iterations[0].fix.as_deref(), Some("manual"));
    assert_eq!(outcome.iterations[1].version_sequence, 2);
}

#[test]
fn cancellation_is_observed_before_the_next_state() {
    let dir = tempdir().expect("tempdir");
    let store = store_in(dir.path());
    let engine = ScriptedEngine::new();
    let settings = settings_with_key(None);
    let local = FakeLocalRunner::unreachable();
    let sleeper = RecordingSleeper::default();
    let collector = EngineContextCollector::new(
        &engine,
        &store,
        &sleeper,
        &settings.credential(),
        &fast_polling(),
    );
    let deps = DebugDeps {
        store: &store,
        env: flowloop::transport::TransportEnv {
            engine: &engine,
            local: &local,
            settings: &settings,
        },
        sleeper: &sleeper,
        collector: &collector,
        fixer: None,
    };
    let token = CancellationToken::new();
    let mut session = DebugSession::new(
        deps,
        webhook_definition("orders", "orders-hook", "initial"),
        options(3, true),
    )
    .expect("session")
    .with_cancellation(token.clone());

    assert_eq!(session.step().expect("prepare"), SessionState::Prepared);
    token.cancel();
    let outcome = session.run().expect("run");
    assert_eq!(outcome.state, SessionState::Aborted);
    assert_eq!(outcome.termination, Some(TerminationReason::Cancelled));
    assert!(engine.calls().is_empty());
}

#[test]
fn terminal_states_accept_no_transitions() {
    for terminal in [
        SessionState::Succeeded,
        SessionState::Exhausted,
        SessionState::Aborted,
    ] {
        assert!(terminal.is_terminal());
        assert!(!terminal.can_transition_to(SessionState::Prepared));
        assert!(!terminal.can_transition_to(SessionState::Aborted));
    }
    assert!(SessionState::AwaitingFix.can_transition_to(SessionState::Prepared));
    assert!(!SessionState::Created.can_transition_to(SessionState::Triggered));
}

#[test]
fn transient_import_failure_keeps_the_session_going() {
    let dir = tempdir().expect("tempdir");
    let store = store_in(dir.path());
    let engine = ScriptedEngine::new().active();
    engine.push_import(Ok(ImportedWorkflow {
        id: remote("wf-1"),
        name: "orders".to_string(),
        active: true,
        created: true,
    }));
    engine.push_import(Err(http_status(503)));
    engine.push_trigger(Err(http_status(500)));
    engine.push_trigger(accepted("ex-2"));
    engine.push_execution(Ok(execution("ex-2", ExecutionState::Success, None)));
    let settings = settings_with_key(Some("secret"));
    let fixer = RevisingFixer::default();

    let (outcome, iteration) =
        run_session(&store, &engine, &settings, Some(&fixer), options(3, true));

    assert_eq!(outcome.state, SessionState::Succeeded);
    assert_eq!(iteration, 2);
    assert_eq!(engine.count("import"), 2);
    let workspace = store.load(&name("orders")).expect("workspace");
    assert_eq!(
        workspace.remote_id.as_ref().map(|id| id.as_str()),
        Some("wf-1")
    );
    let session_log = store
        .log_files_newest_first(&name("orders"))
        .expect("log files")
        .into_iter()
        .find(|path| path.to_string_lossy().contains("debug-"))
        .expect("session log");
    let raw = std::fs::read_to_string(session_log).expect("read session log");
    assert!(raw.contains("debug.import_deferred"), "{raw}");
}

#[test]
fn evidence_carries_recent_log_tail_and_errors() {
    let dir = tempdir().expect("tempdir");
    let store = store_in(dir.path());
    let engine = ScriptedEngine::new();
    engine.push_trigger(Err(http_status(500)));
    let settings = settings_with_key(Some("secret"));

    let (outcome, _) = run_session(&store, &engine, &settings, None, options(1, false));
    let report = outcome.iterations[0].report.as_ref().expect("report");
    let evidence_path = report.evidence_path.as_ref().expect("evidence path");
    let evidence: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(evidence_path).expect("read evidence"))
            .expect("evidence json");

    let logs = &evidence["logs"];
    assert!(logs["file"]
        .as_str()
        .expect("log file name")
        .starts_with("debug-"));
    let tail = logs["tail"].as_array().expect("tail");
    assert!(!tail.is_empty());
    assert!(tail.len() <= 40);
    let errors = logs["recentErrors"].as_array().expect("recent errors");
    assert!(errors
        .iter()
        .any(|event| event["event"] == "execution.sub_attempt" && event["level"] == "warn"));
}
