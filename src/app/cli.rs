#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Init,
    Setup,
    List,
    Show,
    Import,
    Activate,
    Deactivate,
    Status,
    RemoteList,
    Run,
    Debug,
    Batch,
    Prune,
    Cleanup,
    Extract,
    Validate,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "init" => CliVerb::Init,
        "setup" => CliVerb::Setup,
        "list" => CliVerb::List,
        "show" => CliVerb::Show,
        "import" => CliVerb::Import,
        "activate" => CliVerb::Activate,
        "deactivate" => CliVerb::Deactivate,
        "status" => CliVerb::Status,
        "remote-list" => CliVerb::RemoteList,
        "run" => CliVerb::Run,
        "debug" => CliVerb::Debug,
        "batch" => CliVerb::Batch,
        "prune" => CliVerb::Prune,
        "cleanup" => CliVerb::Cleanup,
        "extract" => CliVerb::Extract,
        "validate" => CliVerb::Validate,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  init [--force]                       Write default settings to config.yaml".to_string(),
        "  setup --json <file>                  Create or version the workspace for a definition"
            .to_string(),
        "  list                                 List workspaces".to_string(),
        "  show <name>                          Print a workspace record".to_string(),
        "  import <name>                        Push the current version to the engine".to_string(),
        "  activate <name>                      Activate the workflow and verify".to_string(),
        "  deactivate <name>                    Deactivate the workflow and verify".to_string(),
        "  status <name>                        Query the engine for activation state".to_string(),
        "  remote-list                          List workflows known to the engine".to_string(),
        "  run <name> [--transport <kind>] [--payload <json>] [--test-mode]".to_string(),
        "                                       Execute once with transport fallback".to_string(),
        "  debug --json <file> [--max-iterations <n>] [--auto-fix] [--fix-command <cmd>]"
            .to_string(),
        "                                       Run the bounded debug loop".to_string(),
        "  batch <name> [--delay-ms <n>] [--concurrency <n>] [--payload <json>] [--test-mode]"
            .to_string(),
        "                                       Trigger every recorded endpoint".to_string(),
        "  prune <name> --keep <n>              Drop old history versions".to_string(),
        "  cleanup <name> [--keep <n>]          Keep only the newest log files".to_string(),
        "  extract --json <file>                Print trigger endpoints of a definition"
            .to_string(),
        "  validate --json <file>               Check a definition's structure".to_string(),
        String::new(),
        "Transports: trigger-endpoint, privileged-api, local-process".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}
