use crate::app::command_support::{load_context, parse_args, parse_payload, parse_workflow_name};
use crate::config::EndpointMode;
use crate::debug::session::default_payload;
use crate::engine::HttpEngineClient;
use crate::execution::{
    batch_trigger, BatchOptions, ExecutionAttempt, ExecutionError, ExecutionOptions,
    ExecutionOrchestrator,
};
use crate::shared::time::{now_secs, ThreadSleeper};
use crate::transport::{CommandRunner, TransportEnv, TransportKind};
use crate::workspace::LastExecution;

pub fn cmd_run(args: &[String]) -> Result<String, String> {
    let usage = "run <name> [--transport <kind>] [--payload <json>] [--test-mode]";
    let parsed = parse_args(args, &["--transport", "--payload"], &["--test-mode"])?;
    let name = parse_workflow_name(parsed.single_positional(usage)?)?;
    let transport_override = parsed
        .option("--transport")
        .map(TransportKind::parse)
        .transpose()?;
    let payload = parse_payload(parsed.option("--payload"))?.unwrap_or_else(|| default_payload(false));

    let ctx = load_context()?;
    let workspace = ctx.store.load(&name).map_err(|e| e.to_string())?;
    let mut options = ExecutionOptions::from_settings(&ctx.settings.execution);
    options.transport_override = transport_override;
    if parsed.switch("--test-mode") {
        options.endpoint_mode = EndpointMode::Test;
    }

    let engine = HttpEngineClient::new(&ctx.settings.engine);
    let local = CommandRunner::from_settings(&ctx.settings.engine);
    let env = TransportEnv {
        engine: &engine,
        local: &local,
        settings: &ctx.settings.engine,
    };
    let sleeper = ThreadSleeper;
    let orchestrator =
        ExecutionOrchestrator::new(env, &ctx.store, &sleeper).with_event_log(ctx.log.clone());

    match orchestrator.execute(&workspace, &payload, &options) {
        Ok(attempt) => {
            record_last(&ctx.store, &attempt)?;
            Ok(attempt_lines(&attempt).join("\n"))
        }
        Err(ExecutionError::AllTransportsExhausted { attempt }) => {
            record_last(&ctx.store, &attempt)?;
            Err(failure_lines(&attempt).join("\n"))
        }
        Err(ExecutionError::UnrecoverableConfig {
            reason,
            attempt: Some(attempt),
        }) => {
            record_last(&ctx.store, &attempt)?;
            let mut lines = vec![format!("unrecoverable configuration: {reason}")];
            lines.extend(failure_lines(&attempt));
            Err(lines.join("\n"))
        }
        Err(err) => Err(err.to_string()),
    }
}

fn failure_lines(attempt: &ExecutionAttempt) -> Vec<String> {
    let mut lines = attempt_lines(attempt);
    lines.extend(attempt.transport_failures.iter().map(|failure| {
        format!(
            "failure={} class={} detail={}",
            failure.transport, failure.class, failure.detail
        )
    }));
    lines
}

pub fn cmd_batch(args: &[String]) -> Result<String, String> {
    let usage =
        "batch <name> [--delay-ms <n>] [--concurrency <n>] [--payload <json>] [--test-mode]";
    let parsed = parse_args(
        args,
        &["--delay-ms", "--concurrency", "--payload"],
        &["--test-mode"],
    )?;
    let name = parse_workflow_name(parsed.single_positional(usage)?)?;
    let payload = parse_payload(parsed.option("--payload"))?.unwrap_or_else(|| default_payload(false));

    let ctx = load_context()?;
    let workspace = ctx.store.load(&name).map_err(|e| e.to_string())?;
    if workspace.endpoints.is_empty() {
        return Err(format!("workspace `{name}` has no trigger endpoints"));
    }
    let mode = if parsed.switch("--test-mode") {
        EndpointMode::Test
    } else {
        ctx.settings.execution.endpoint_mode
    };
    let mut options =
        BatchOptions::from_settings(&ctx.settings.batch, ctx.settings.execution.timeout(), mode);
    if let Some(delay_ms) = parsed.parsed::<u64>("--delay-ms")? {
        options.delay = std::time::Duration::from_millis(delay_ms);
    }
    if let Some(concurrency) = parsed.parsed::<usize>("--concurrency")? {
        options.concurrency = concurrency.max(1);
    }

    let engine = HttpEngineClient::new(&ctx.settings.engine);
    let items = batch_trigger(
        &engine,
        &ThreadSleeper,
        &workspace.endpoints,
        &payload,
        &options,
        &ctx.log,
    );
    let succeeded = items.iter().filter(|item| item.succeeded()).count();
    let mut lines = vec![
        format!("workspace={name}"),
        format!("triggered={}", items.len()),
        format!("succeeded={succeeded}"),
        format!("failed={}", items.len() - succeeded),
    ];
    for item in &items {
        let status = item
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        match &item.failure {
            None => lines.push(format!(
                "endpoint={} status={status} execution_id={}",
                item.node_name,
                item.execution_id.as_deref().unwrap_or("-")
            )),
            Some(failure) => lines.push(format!(
                "endpoint={} status={status} failure={}",
                item.node_name, failure
            )),
        }
    }
    Ok(lines.join("\n"))
}

fn attempt_lines(attempt: &ExecutionAttempt) -> Vec<String> {
    vec![
        format!("workspace={}", attempt.workspace),
        format!("attempt_id={}", attempt.attempt_id),
        format!("outcome={}", attempt.outcome),
        format!(
            "transport={}",
            attempt
                .transport
                .map(|t| t.as_str())
                .unwrap_or("-")
        ),
        format!("retries={}", attempt.retry_count),
        format!(
            "execution_id={}",
            attempt.execution_id.as_deref().unwrap_or("-")
        ),
        format!("engine_completed={}", attempt.engine_completed),
    ]
}

fn record_last(
    store: &crate::workspace::WorkspaceStore,
    attempt: &ExecutionAttempt,
) -> Result<(), String> {
    store
        .record_last_execution(
            &attempt.workspace,
            LastExecution {
                attempt_id: attempt.attempt_id.clone(),
                outcome: attempt.outcome.to_string(),
                transport: attempt.transport,
                execution_id: attempt.execution_id.clone(),
                verdict: None,
                context_file: None,
                recorded_at: now_secs(),
            },
        )
        .map(|_| ())
        .map_err(|e| e.to_string())
}
