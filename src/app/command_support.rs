use crate::config::{default_state_root, load_settings, ConfigError, Settings, SettingsOverrides};
use crate::shared::ids::{normalize_workflow_name, WorkflowName};
use crate::shared::logging::{tool_log_path, EventLog};
use crate::workspace::{WorkflowDefinition, WorkspaceStore};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Loaded once per command from `$HOME/.flowloop`.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub state_root: PathBuf,
    pub settings: Settings,
    pub store: WorkspaceStore,
    pub log: EventLog,
}

pub fn map_config_err(err: ConfigError) -> String {
    err.to_string()
}

pub fn load_context() -> Result<AppContext, String> {
    let state_root = default_state_root().map_err(map_config_err)?;
    context_for_root(state_root, &SettingsOverrides::from_env())
}

pub fn context_for_root(
    state_root: PathBuf,
    overrides: &SettingsOverrides,
) -> Result<AppContext, String> {
    let settings = load_settings(&state_root, overrides).map_err(map_config_err)?;
    let log = EventLog::to_file(tool_log_path(&state_root));
    let store = WorkspaceStore::new(&state_root)
        .with_retention(settings.retention.keep_last)
        .with_event_log(log.clone());
    Ok(AppContext {
        state_root,
        settings,
        store,
        log,
    })
}

/// Accepts either an exact workspace name or a free-form one to normalize.
pub fn parse_workflow_name(raw: &str) -> Result<WorkflowName, String> {
    WorkflowName::parse(raw).or_else(|_| normalize_workflow_name(raw))
}

pub fn load_definition(path: &str) -> Result<WorkflowDefinition, String> {
    WorkflowDefinition::from_path(Path::new(path)).map_err(|e| e.to_string())
}

pub fn parse_payload(raw: Option<&str>) -> Result<Option<Value>, String> {
    raw.map(|raw| {
        serde_json::from_str(raw).map_err(|e| format!("--payload must be valid json: {e}"))
    })
    .transpose()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedArgs {
    pub positionals: Vec<String>,
    pub options: BTreeMap<String, String>,
    pub switches: BTreeSet<String>,
}

impl ParsedArgs {
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn switch(&self, name: &str) -> bool {
        self.switches.contains(name)
    }

    pub fn required(&self, name: &str, usage: &str) -> Result<&str, String> {
        self.option(name)
            .ok_or_else(|| format!("missing {name}\nusage: {usage}"))
    }

    pub fn parsed<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, String> {
        self.option(name)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|_| format!("{name} has invalid value `{raw}`"))
            })
            .transpose()
    }

    pub fn single_positional(&self, usage: &str) -> Result<&str, String> {
        match self.positionals.as_slice() {
            [only] => Ok(only.as_str()),
            _ => Err(format!("usage: {usage}")),
        }
    }
}

/// Splits `args` into positionals, `--flag value` options and bare switches.
pub fn parse_args(
    args: &[String],
    value_flags: &[&str],
    switch_flags: &[&str],
) -> Result<ParsedArgs, String> {
    let mut parsed = ParsedArgs::default();
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        if value_flags.contains(&arg) {
            let value = args
                .get(i + 1)
                .ok_or_else(|| format!("{arg} requires a value"))?;
            parsed.options.insert(arg.to_string(), value.clone());
            i += 2;
            continue;
        }
        if switch_flags.contains(&arg) {
            parsed.switches.insert(arg.to_string());
            i += 1;
            continue;
        }
        if arg.starts_with("--") {
            return Err(format!("unknown option `{arg}`"));
        }
        parsed.positionals.push(arg.to_string());
        i += 1;
    }
    Ok(parsed)
}
