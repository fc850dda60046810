use crate::app::command_support::{load_context, load_definition, parse_args, parse_payload};
use crate::debug::{
    CommandFixer, DebugDeps, DebugOptions, DebugOutcome, DebugSession, EngineContextCollector,
    Fixer, PromptFixer, SessionState,
};
use crate::engine::HttpEngineClient;
use crate::shared::time::ThreadSleeper;
use crate::transport::{CommandRunner, TransportEnv};

pub fn cmd_debug(args: &[String]) -> Result<String, String> {
    let usage = "debug --json <file> [--max-iterations <n>] [--auto-fix] [--fix-command <cmd>] [--payload <json>]";
    let parsed = parse_args(
        args,
        &["--json", "--max-iterations", "--fix-command", "--payload"],
        &["--auto-fix"],
    )?;
    let source_path = parsed.required("--json", usage)?.to_string();
    if !parsed.positionals.is_empty() {
        return Err(format!("usage: {usage}"));
    }
    let definition = load_definition(&source_path)?;
    definition.validate().map_err(|e| e.to_string())?;

    let ctx = load_context()?;
    let mut options = DebugOptions::from_settings(&ctx.settings);
    if let Some(max) = parsed.parsed::<u32>("--max-iterations")? {
        if max == 0 {
            return Err("--max-iterations must be at least 1".to_string());
        }
        options.max_iterations = max;
    }
    if let Some(payload) = parse_payload(parsed.option("--payload"))? {
        options.payload = payload;
    }
    options.auto_fix = parsed.switch("--auto-fix") || parsed.option("--fix-command").is_some();

    let engine = HttpEngineClient::new(&ctx.settings.engine);
    let local = CommandRunner::from_settings(&ctx.settings.engine);
    let env = TransportEnv {
        engine: &engine,
        local: &local,
        settings: &ctx.settings.engine,
    };
    let sleeper = ThreadSleeper;
    let collector = EngineContextCollector::new(
        &engine,
        &ctx.store,
        &sleeper,
        &ctx.settings.engine.credential(),
        &ctx.settings.debug,
    );

    let command_fixer = parsed
        .option("--fix-command")
        .map(|command| {
            CommandFixer::from_command_line(
                command,
                ctx.store.context_dir(definition.name()),
                ctx.settings.execution.timeout(),
            )
            .map_err(|e| e.to_string())
        })
        .transpose()?;
    let prompt_fixer = PromptFixer::new(&source_path, std::io::stdin().lock(), std::io::stderr());
    let fixer: Option<&dyn Fixer> = match (&command_fixer, options.auto_fix) {
        (Some(command_fixer), _) => Some(command_fixer as &dyn Fixer),
        (None, true) => Some(&prompt_fixer as &dyn Fixer),
        (None, false) => None,
    };

    let deps = DebugDeps {
        store: &ctx.store,
        env,
        sleeper: &sleeper,
        collector: &collector,
        fixer,
    };
    let mut session = DebugSession::new(deps, definition, options)
        .map_err(|e| e.to_string())?
        .with_event_log(ctx.log.clone());
    let outcome = session.run().map_err(|e| e.to_string())?;

    let mut lines = outcome_lines(&outcome);
    if let Some(path) = session.log_path() {
        lines.push(format!("log={}", path.display()));
    }
    if outcome.state == SessionState::Succeeded {
        Ok(lines.join("\n"))
    } else {
        Err(lines.join("\n"))
    }
}

fn outcome_lines(outcome: &DebugOutcome) -> Vec<String> {
    let mut lines = vec![
        format!("session_id={}", outcome.session_id),
        format!("workspace={}", outcome.workspace),
        format!("state={}", outcome.state),
        format!(
            "termination={}",
            outcome.termination.map(|t| t.as_str()).unwrap_or("-")
        ),
        format!("iterations={}", outcome.iterations.len()),
    ];
    if let Some(detail) = outcome.detail.as_deref() {
        lines.push(format!("detail={detail}"));
    }
    for iteration in &outcome.iterations {
        let attempt = iteration
            .attempt
            .as_ref()
            .map(|a| a.outcome.to_string())
            .unwrap_or_else(|| "-".to_string());
        let verdict = iteration
            .report
            .as_ref()
            .map(|r| r.verdict.label())
            .unwrap_or("-");
        lines.push(format!(
            "iteration={} version={} attempt={attempt} verdict={verdict} fix={}",
            iteration.index,
            iteration.version_sequence,
            iteration.fix.as_deref().unwrap_or("-")
        ));
    }
    lines
}
