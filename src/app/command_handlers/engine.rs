use crate::app::command_support::{load_context, parse_args, parse_workflow_name, AppContext};
use crate::engine::{EngineApi, HttpEngineClient};
use crate::shared::ids::RemoteWorkflowId;
use crate::workspace::{ActivationState, Workspace};
use serde_json::json;

pub fn cmd_import(args: &[String]) -> Result<String, String> {
    let usage = "import <name>";
    let parsed = parse_args(args, &[], &[])?;
    let name = parse_workflow_name(parsed.single_positional(usage)?)?;
    let ctx = load_context()?;
    let workspace = ctx.store.load(&name).map_err(|e| e.to_string())?;
    let definition = ctx
        .store
        .current_definition(&name)
        .map_err(|e| e.to_string())?;
    definition.validate().map_err(|e| e.to_string())?;

    let engine = HttpEngineClient::new(&ctx.settings.engine);
    let imported = engine
        .import_workflow(&definition.import_body(), workspace.remote_id.as_ref())
        .map_err(|e| e.to_string())?;
    ctx.store
        .record_remote_id(&name, &imported.id)
        .map_err(|e| e.to_string())?;
    ctx.store
        .record_activation(&name, ActivationState::from_active(imported.active))
        .map_err(|e| e.to_string())?;
    let endpoints = definition.extract_trigger_endpoints(engine.base_url());
    let endpoint_count = endpoints.len();
    ctx.store
        .record_endpoints(&name, endpoints)
        .map_err(|e| e.to_string())?;
    ctx.log.info(
        "engine.imported",
        json!({"workspace": name.as_str(), "remoteId": imported.id.as_str(), "created": imported.created}),
    );

    Ok([
        format!("workspace={name}"),
        format!("remote_id={}", imported.id),
        format!("created={}", imported.created),
        format!("active={}", imported.active),
        format!("endpoints={endpoint_count}"),
    ]
    .join("\n"))
}

pub fn cmd_set_active(args: &[String], active: bool) -> Result<String, String> {
    let verb = if active { "activate" } else { "deactivate" };
    let parsed = parse_args(args, &[], &[])?;
    let name = parse_workflow_name(parsed.single_positional(&format!("{verb} <name>"))?)?;
    let ctx = load_context()?;
    let (workspace, remote_id) = imported_workspace(&ctx, &name)?;
    let engine = HttpEngineClient::new(&ctx.settings.engine);
    let status = engine
        .set_active(&remote_id, active)
        .map_err(|e| e.to_string())?;
    ctx.store
        .record_activation(&workspace.name, ActivationState::from_active(status.active))
        .map_err(|e| e.to_string())?;
    ctx.log.info(
        "engine.activation_changed",
        json!({"workspace": name.as_str(), "remoteId": remote_id.as_str(), "active": status.active}),
    );
    Ok([
        format!("workspace={name}"),
        format!("remote_id={remote_id}"),
        format!("active={}", status.active),
    ]
    .join("\n"))
}

pub fn cmd_status(args: &[String]) -> Result<String, String> {
    let parsed = parse_args(args, &[], &[])?;
    let name = parse_workflow_name(parsed.single_positional("status <name>")?)?;
    let ctx = load_context()?;
    let (workspace, remote_id) = imported_workspace(&ctx, &name)?;
    let engine = HttpEngineClient::new(&ctx.settings.engine);
    let status = engine
        .workflow_status(&remote_id)
        .map_err(|e| e.to_string())?;
    ctx.store
        .record_activation(&workspace.name, ActivationState::from_active(status.active))
        .map_err(|e| e.to_string())?;
    Ok([
        format!("workspace={name}"),
        format!("remote_id={remote_id}"),
        format!("remote_name={}", status.name),
        format!("active={}", status.active),
        format!("updated_at={}", status.updated_at.as_deref().unwrap_or("-")),
    ]
    .join("\n"))
}

pub fn cmd_remote_list(args: &[String]) -> Result<String, String> {
    let parsed = parse_args(args, &[], &[])?;
    if !parsed.positionals.is_empty() {
        return Err("usage: remote-list".to_string());
    }
    let ctx = load_context()?;
    let engine = HttpEngineClient::new(&ctx.settings.engine);
    let workflows = engine.list_workflows().map_err(|e| e.to_string())?;
    if workflows.is_empty() {
        return Ok("no remote workflows".to_string());
    }
    let local = ctx.store.list().map_err(|e| e.to_string())?;
    Ok(workflows
        .iter()
        .map(|workflow| {
            let workspace = local
                .iter()
                .find(|summary| {
                    summary
                        .remote_id
                        .as_ref()
                        .is_some_and(|id| id.as_str() == workflow.id)
                })
                .map(|summary| summary.name.as_str())
                .unwrap_or("-");
            format!(
                "{} active={} workspace={workspace} name={}",
                workflow.id, workflow.active, workflow.name
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

fn imported_workspace(
    ctx: &AppContext,
    name: &crate::shared::ids::WorkflowName,
) -> Result<(Workspace, RemoteWorkflowId), String> {
    let workspace = ctx.store.load(name).map_err(|e| e.to_string())?;
    let remote_id = workspace
        .remote_id
        .clone()
        .ok_or_else(|| format!("workspace `{name}` has not been imported; run `import {name}`"))?;
    Ok((workspace, remote_id))
}
