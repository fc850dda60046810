use crate::app::command_support::{
    load_context, load_definition, map_config_err, parse_args, parse_workflow_name,
};
use crate::config::{default_state_root, settings_path, Settings, DEFAULT_ENGINE_BASE_URL};
use crate::workspace::SetupChange;

pub fn cmd_init(args: &[String]) -> Result<String, String> {
    let parsed = parse_args(args, &[], &["--force"])?;
    if !parsed.positionals.is_empty() {
        return Err("usage: init [--force]".to_string());
    }
    let path = settings_path(&default_state_root().map_err(map_config_err)?);
    if path.exists() && !parsed.switch("--force") {
        return Err(format!(
            "settings already exist at {}; pass --force to overwrite",
            path.display()
        ));
    }
    Settings::default().save(&path).map_err(map_config_err)?;
    Ok(format!("settings={}", path.display()))
}

pub fn cmd_setup(args: &[String]) -> Result<String, String> {
    let usage = "setup --json <file>";
    let parsed = parse_args(args, &["--json"], &[])?;
    let definition = load_definition(parsed.required("--json", usage)?)?;
    definition.validate().map_err(|e| e.to_string())?;
    let ctx = load_context()?;

    let outcome = ctx.store.setup(&definition).map_err(|e| e.to_string())?;
    let endpoints = definition.extract_trigger_endpoints(ctx.settings.engine.trimmed_base_url());
    let endpoint_count = endpoints.len();
    let workspace = ctx
        .store
        .record_endpoints(definition.name(), endpoints)
        .map_err(|e| e.to_string())?;

    let change = match outcome.change {
        SetupChange::Created => "created".to_string(),
        SetupChange::Updated { previous } => format!("updated(previous={previous})"),
        SetupChange::Unchanged => "unchanged".to_string(),
    };
    Ok([
        format!("workspace={}", workspace.name),
        format!("change={change}"),
        format!("version={}", workspace.current_sequence()),
        format!("versions={}", workspace.versions.len()),
        format!("endpoints={endpoint_count}"),
        format!("path={}", ctx.store.workspace_dir(&workspace.name).display()),
    ]
    .join("\n"))
}

pub fn cmd_list(args: &[String]) -> Result<String, String> {
    if !args.is_empty() {
        return Err("usage: list".to_string());
    }
    let ctx = load_context()?;
    let summaries = ctx.store.list().map_err(|e| e.to_string())?;
    if summaries.is_empty() {
        return Ok("no workspaces".to_string());
    }
    Ok(summaries
        .iter()
        .map(|s| {
            format!(
                "{} version={} versions={} remote_id={} activation={} endpoints={} last={}",
                s.name,
                s.current_sequence,
                s.version_count,
                s.remote_id.as_ref().map(|v| v.as_str()).unwrap_or("-"),
                s.activation,
                s.endpoint_count,
                s.last_outcome.as_deref().unwrap_or("-"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

pub fn cmd_show(args: &[String]) -> Result<String, String> {
    let usage = "show <name>";
    let parsed = parse_args(args, &[], &[])?;
    let name = parse_workflow_name(parsed.single_positional(usage)?)?;
    let ctx = load_context()?;
    let workspace = ctx.store.load(&name).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&workspace).map_err(|e| format!("failed to encode workspace: {e}"))
}

pub fn cmd_prune(args: &[String]) -> Result<String, String> {
    let usage = "prune <name> --keep <n>";
    let parsed = parse_args(args, &["--keep"], &[])?;
    let name = parse_workflow_name(parsed.single_positional(usage)?)?;
    let keep = parsed
        .parsed::<usize>("--keep")?
        .ok_or_else(|| format!("missing --keep\nusage: {usage}"))?;
    let ctx = load_context()?;
    let report = ctx.store.prune(&name, keep).map_err(|e| e.to_string())?;
    Ok([
        format!("workspace={name}"),
        format!("removed={}", join_sequences(&report.removed)),
        format!("retained={}", join_sequences(&report.retained)),
    ]
    .join("\n"))
}

pub fn cmd_cleanup(args: &[String]) -> Result<String, String> {
    let usage = "cleanup <name> [--keep <n>]";
    let parsed = parse_args(args, &["--keep"], &[])?;
    let name = parse_workflow_name(parsed.single_positional(usage)?)?;
    let ctx = load_context()?;
    let keep = parsed
        .parsed::<usize>("--keep")?
        .unwrap_or(ctx.settings.retention.keep_logs);
    let removed = ctx
        .store
        .cleanup_logs(&name, keep)
        .map_err(|e| e.to_string())?;
    Ok([
        format!("workspace={name}"),
        format!("kept={keep}"),
        format!("removed={}", removed.len()),
    ]
    .join("\n"))
}

/// Needs no state; the base URL falls back to the default engine address.
pub fn cmd_extract(args: &[String]) -> Result<String, String> {
    let usage = "extract --json <file>";
    let parsed = parse_args(args, &["--json"], &[])?;
    let definition = load_definition(parsed.required("--json", usage)?)?;
    let base_url = load_context()
        .map(|ctx| ctx.settings.engine.trimmed_base_url().to_string())
        .unwrap_or_else(|_| DEFAULT_ENGINE_BASE_URL.to_string());
    let endpoints = definition.extract_trigger_endpoints(&base_url);
    serde_json::to_string_pretty(&endpoints).map_err(|e| format!("failed to encode endpoints: {e}"))
}

pub fn cmd_validate(args: &[String]) -> Result<String, String> {
    let usage = "validate --json <file>";
    let parsed = parse_args(args, &["--json"], &[])?;
    let definition = load_definition(parsed.required("--json", usage)?)?;
    definition.validate().map_err(|e| e.to_string())?;
    Ok([
        "valid=true".to_string(),
        format!("name={}", definition.name()),
        format!("title={}", definition.display_name()),
        format!("nodes={}", definition.node_count()),
        format!("credentials={}", definition.has_credentials()),
    ]
    .join("\n"))
}

fn join_sequences(values: &[u64]) -> String {
    if values.is_empty() {
        return "-".to_string();
    }
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
